//! # Sensor Codec Module
//!
//! Pure decoders that turn raw sensor bytes into typed readings.
//!
//! This module handles:
//! - RuuviTag beacon payloads (Eddystone-URL formats 2/4, RAWv1 format 3,
//!   RAWv2 format 5)
//! - The TMP117 temperature sensor status/configuration register
//! - The shared bit access primitive both of them are built on
//!
//! Nothing in here performs I/O. Acquiring the raw bytes is the job of the
//! hardware collaborators (see [`crate::telemetry::cycle::SensorSuite`]).

pub mod bits;
pub mod ruuvi;
pub mod tmp117;

use thiserror::Error;

pub use bits::{BitError, BitField};
pub use ruuvi::{absent_on_error, decode_external_sensor, decode_or_absent, decode_url_payload, ExternalSensorReading};
pub use tmp117::{decode_status_register, Tmp117Config};

/// Sensor decoding and acquisition errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    /// Format discriminant is not one we can decode
    #[error("Unknown sensor data format: {0}")]
    UnknownFormat(u8),

    /// Payload shorter than its format requires
    #[error("Sensor payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },

    /// Eddystone-URL payload could not be decoded
    #[error("Invalid URL payload: {0}")]
    InvalidUrlPayload(String),

    /// Bit access outside the register width
    #[error("Bit access error: {0}")]
    Bits(#[from] BitError),

    /// Reading could not be acquired from the hardware collaborator
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),
}
