use std::path::{Path, PathBuf};
use async_trait::async_trait;
use directories_next::ProjectDirs;
use log::info;
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::PersistError;
use crate::record::types::MeasurementRecord;
use crate::scale::types::ScaleReading;

/// The "save measurement" capability the pairing workflow hands confirmed readings to.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn save(&self, reading: &ScaleReading, girth_cm: Option<f64>) -> Result<(), PersistError>;
}

/// Appends one JSON document per measurement to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: PathBuf) -> Self {
        JsonLinesStore { path }
    }

    /// The records file in an os dependent data directory, such as %AppData% on windows.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("app", "bodyscale", "bodyscale-pairing").map(|dirs| {
            dirs.data_dir().join("measurements.jsonl")
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MeasurementStore for JsonLinesStore {
    async fn save(&self, reading: &ScaleReading, girth_cm: Option<f64>) -> Result<(), PersistError> {
        let record = MeasurementRecord::new(reading.clone(), girth_cm);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(directory) = self.path.parent() {
            create_dir_all(directory).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!("Saved measurement ({}) to {}", record.risk, self.path.to_string_lossy());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::manual::ManualEntryPath;

    #[tokio::test]
    async fn test_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path().join("nested").join("measurements.jsonl"));
        let path = ManualEntryPath::new(170.0);

        store.save(&path.build_reading(72.0, Some(88.0)).unwrap(), Some(88.0)).await.unwrap();
        store.save(&path.build_reading(95.0, None).unwrap(), None).await.unwrap();

        let content = tokio::fs::read_to_string(store.path()).await.unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["girthCm"], 88.0);
        assert_eq!(lines[0]["risk"], "normal");
        assert_eq!(lines[0]["reading"]["weightKg"], 72.0);
        assert_eq!(lines[1]["girthCm"], serde_json::Value::Null);
        assert_eq!(lines[1]["risk"], "obesity");
        assert!(lines[1]["reading"]["capturedAt"].is_string());
    }

    #[tokio::test]
    async fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // a directory can not be opened for appending
        let store = JsonLinesStore::new(dir.path().to_path_buf());
        let reading = ManualEntryPath::new(170.0).build_reading(72.0, None).unwrap();

        assert!(matches!(store.save(&reading, None).await, Err(PersistError::Io { .. })));
    }
}
