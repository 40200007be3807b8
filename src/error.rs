use std::fmt::Display;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use uuid::Uuid;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload too short to carry a weight ({len} bytes)")]
    TooShort { len: usize },

    #[error("Payload of {len} bytes ends before offset {needed}")]
    Truncated { needed: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No device was selected")]
    Cancelled,

    #[error("Bluetooth Low Energy is not available on this system")]
    Unsupported,

    #[error("The bluetooth operation timed out")]
    Timeout,

    #[error("Error communicating with device: {detail}")]
    TransportError { detail: String },

    #[error("A device connection is already open")]
    AlreadyConnected,

    #[error("The device does not offer the required service {service}")]
    MissingService { service: Uuid },
}

impl From<btleplug::Error> for ConnectError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => ConnectError::Unsupported,
            btleplug::Error::NotSupported(_) => ConnectError::Unsupported,
            btleplug::Error::TimedOut(_) => ConnectError::Timeout,
            other => ConnectError::TransportError { detail: other.to_string() },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("Failed to write measurement record: {detail}")]
    Io { detail: String },

    #[error("Failed to encode measurement record: {detail}")]
    Encode { detail: String },

    #[error("Measurement record was rejected: {detail}")]
    Rejected { detail: String },
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        PersistError::Io { detail: err.to_string() }
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Encode { detail: err.to_string() }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManualEntryError {
    #[error("Weight {weight_kg} kg is outside the plausible range of {min}-{max} kg")]
    WeightOutOfRange { weight_kg: f64, min: f64, max: f64 },

    #[error("Girth {girth_cm} cm is outside the plausible range of {min}-{max} cm")]
    GirthOutOfRange { girth_cm: f64, min: f64, max: f64 },

    #[error("Height {height_cm} cm is not usable")]
    InvalidHeight { height_cm: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Can not {action} while {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("Invalid manual entry: {source}")]
    ManualEntry { #[from] source: ManualEntryError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("{source}")]
    Workflow { #[from] source: WorkflowError },

    #[error("Failed to decode payload: {source}")]
    Decode { #[from] source: DecodeError },

    #[error("Invalid hex payload: {source}")]
    Hex { #[from] source: hex::FromHexError },

    #[error("Pairing did not complete: {reason}")]
    NotCompleted { reason: String },
}

pub fn report_error<T: Display>(message: &'static str, error: &T) {
    eprintln!("{}: {}", message, error);
}
