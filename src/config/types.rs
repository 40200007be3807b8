use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::scale::connector::ConnectorTimings;
use crate::scale::constants::{CONNECT_DEADLINE, DEFAULT_HEIGHT_M, MEASUREMENT_TIMEOUT, SCAN_DURATION};
use crate::scale::workflow::WorkflowSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub height_cm: f64,
    pub measurement_timeout_secs: u64,
    pub scan_duration_secs: u64,
    pub connect_timeout_secs: u64,
    pub records_path: Option<PathBuf>,
}

impl Config {
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            height_cm: self.height_cm,
            measurement_timeout: Duration::from_secs(self.measurement_timeout_secs),
        }
    }

    pub fn connector_timings(&self) -> ConnectorTimings {
        ConnectorTimings {
            scan_duration: Duration::from_secs(self.scan_duration_secs),
            connect_deadline: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            height_cm: DEFAULT_HEIGHT_M * 100.0,
            measurement_timeout_secs: MEASUREMENT_TIMEOUT / 1000,
            scan_duration_secs: SCAN_DURATION / 1000,
            connect_timeout_secs: CONNECT_DEADLINE / 1000,
            records_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"heightCm": 182.5}"#).unwrap();

        assert_eq!(config.height_cm, 182.5);
        assert_eq!(config.measurement_timeout_secs, 30);
        assert_eq!(config.workflow_settings().measurement_timeout, Duration::from_secs(30));
        assert_eq!(config.connector_timings().scan_duration, Duration::from_secs(5));
        assert_eq!(config.records_path, None);
    }
}
