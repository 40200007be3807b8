use std::fmt;
use std::time::SystemTime;
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ConnectError, DecodeError, PersistError};

/// One measurement, either decoded from the scale or built from manual input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleReading {
    weight_kg: f64,
    bmi: f64,
    body_fat_percent: f64,
    muscle_mass_kg: f64,
    water_percent: f64,
    bone_mass_kg: f64,
    visceral_fat_index: u8,
    metabolic_age_years: u8,
    #[serde(serialize_with = "serialize_timestamp")]
    captured_at: SystemTime,
}

/// Body composition fields, all zero when the payload carried weight only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Composition {
    pub body_fat_percent: f64,
    pub muscle_mass_kg: f64,
    pub water_percent: f64,
    pub bone_mass_kg: f64,
    pub visceral_fat_index: u8,
    pub metabolic_age_years: u8,
}

impl ScaleReading {
    pub(crate) fn new(weight_kg: f64, bmi: f64, composition: Composition, captured_at: SystemTime) -> Self {
        ScaleReading {
            weight_kg,
            bmi,
            body_fat_percent: composition.body_fat_percent,
            muscle_mass_kg: composition.muscle_mass_kg,
            water_percent: composition.water_percent,
            bone_mass_kg: composition.bone_mass_kg,
            visceral_fat_index: composition.visceral_fat_index,
            metabolic_age_years: composition.metabolic_age_years,
            captured_at,
        }
    }

    pub fn weight_kg(&self) -> f64 { self.weight_kg }
    pub fn bmi(&self) -> f64 { self.bmi }
    pub fn body_fat_percent(&self) -> f64 { self.body_fat_percent }
    pub fn muscle_mass_kg(&self) -> f64 { self.muscle_mass_kg }
    pub fn water_percent(&self) -> f64 { self.water_percent }
    pub fn bone_mass_kg(&self) -> f64 { self.bone_mass_kg }
    pub fn visceral_fat_index(&self) -> u8 { self.visceral_fat_index }
    pub fn metabolic_age_years(&self) -> u8 { self.metabolic_age_years }
    pub fn captured_at(&self) -> SystemTime { self.captured_at }

    pub fn has_composition(&self) -> bool {
        self.body_fat_percent > 0.0 || self.muscle_mass_kg > 0.0 || self.water_percent > 0.0 || self.bone_mass_kg > 0.0
    }
}

impl fmt::Display for ScaleReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kg, BMI {:.1}", self.weight_kg, self.bmi)?;

        if self.has_composition() {
            write!(
                f,
                ", body fat {:.1}%, muscle {:.1} kg, water {:.1}%, bone {:.1} kg, visceral fat {}, metabolic age {}",
                self.body_fat_percent,
                self.muscle_mass_kg,
                self.water_percent,
                self.bone_mass_kg,
                self.visceral_fat_index,
                self.metabolic_age_years,
            )?;
        }

        Ok(())
    }
}

pub(crate) fn serialize_timestamp<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_rfc3339_millis(*time))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    Notification(RawNotification),
    // the notification stream ended, usually because the connection dropped
    Closed { characteristic: Uuid },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("no scale was selected")]
    NoDeviceSelected,

    #[error("bluetooth is not available, enter the measurement manually")]
    Unsupported,

    #[error("{0}")]
    Connect(ConnectError),

    #[error("the connection to the scale was lost")]
    ConnectionLost,

    #[error("{0}")]
    PersistError(PersistError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    Scanning,
    Connecting,
    AwaitingMeasurement,
    Confirming(ScaleReading),
    Saving,
    Completed,
    ManualEntry,
    Failed(FailureReason),
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed(_))
    }

    /// Whether `next` may follow this state. Reset to `Idle` is always allowed.
    pub fn can_transition_to(&self, next: &WorkflowState) -> bool {
        use WorkflowState::*;

        match (self, next) {
            (_, Idle) => true,
            (Idle, Scanning) => true,
            (Scanning, Connecting) => true,
            (Scanning, Failed(_)) => true,
            (Connecting, AwaitingMeasurement) => true,
            (Connecting, Failed(_)) => true,
            (AwaitingMeasurement, Confirming(_)) => true,
            (AwaitingMeasurement, ManualEntry) => true,
            (AwaitingMeasurement, Failed(FailureReason::ConnectionLost)) => true,
            (Confirming(_), Saving) => true,
            (ManualEntry, Saving) => true,
            (Idle, Saving) => true,
            (Failed(FailureReason::PersistError(_)), Saving) => true,
            (Saving, Completed) => true,
            (Saving, Failed(FailureReason::PersistError(_))) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => write!(f, "idle"),
            WorkflowState::Scanning => write!(f, "scanning"),
            WorkflowState::Connecting => write!(f, "connecting"),
            WorkflowState::AwaitingMeasurement => write!(f, "awaiting measurement"),
            WorkflowState::Confirming(_) => write!(f, "confirming"),
            WorkflowState::Saving => write!(f, "saving"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::ManualEntry => write!(f, "manual entry"),
            WorkflowState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StateChange(WorkflowState),
    DeviceSelected { name: String, address: String },
    Battery(u8), // [0, 100]
    Measured(ScaleReading),
    Saved(ScaleReading),
    NotificationRejected(DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> ScaleReading {
        ScaleReading::new(72.5, 25.1, Composition::default(), SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn reset_is_always_allowed() {
        let states = vec![
            WorkflowState::Idle,
            WorkflowState::Scanning,
            WorkflowState::Connecting,
            WorkflowState::AwaitingMeasurement,
            WorkflowState::Confirming(reading()),
            WorkflowState::Saving,
            WorkflowState::Completed,
            WorkflowState::ManualEntry,
            WorkflowState::Failed(FailureReason::ConnectionLost),
        ];

        for state in states {
            assert!(state.can_transition_to(&WorkflowState::Idle), "{}", state);
        }
    }

    #[test]
    fn measurement_can_not_skip_confirmation() {
        assert!(!WorkflowState::AwaitingMeasurement.can_transition_to(&WorkflowState::Saving));
        assert!(!WorkflowState::Scanning.can_transition_to(&WorkflowState::AwaitingMeasurement));
        assert!(!WorkflowState::Completed.can_transition_to(&WorkflowState::Saving));
    }

    #[test]
    fn only_persist_failures_allow_resubmission() {
        let persist = WorkflowState::Failed(FailureReason::PersistError(PersistError::Rejected { detail: "x".into() }));
        let lost = WorkflowState::Failed(FailureReason::ConnectionLost);

        assert!(persist.can_transition_to(&WorkflowState::Saving));
        assert!(!lost.can_transition_to(&WorkflowState::Saving));
    }

    #[test]
    fn weight_only_reading_displays_without_composition() {
        let text = reading().to_string();
        assert_eq!(text, "72.50 kg, BMI 25.1");
    }
}
