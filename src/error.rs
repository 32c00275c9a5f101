//! # Error Types
//!
//! Crate-wide error type for Tracker Link using `thiserror`.
//!
//! Each component owns a narrower error enum; they all convert into
//! [`TrackerError`] so the binary can propagate with `?`.

use thiserror::Error;

use crate::sensor::SensorError;
use crate::session::SessionError;
use crate::store::config_record::ConfigError;
use crate::store::StoreError;
use crate::wire::protocol::FrameError;

/// Main error type for Tracker Link
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Wire frame encoding/decoding errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Sensor payload decoding errors
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    /// Config record validation errors
    #[error("Config record error: {0}")]
    ConfigRecord(#[from] ConfigError),

    /// Byte store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Telemetry session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Bootstrap configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subscriber installation errors
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tracker Link
pub type Result<T> = std::result::Result<T, TrackerError>;
