//! # Telemetry Module
//!
//! Builds one telemetry frame per wake cycle and runs the cycle.
//!
//! This module handles:
//! - The telemetry frame model shared by the encoder and decoder
//! - Sampling sensors through the [`cycle::SensorSuite`] collaborator
//! - Queueing the frame and running one transport session

pub mod frame;
pub mod cycle;

pub use cycle::{run_cycle, CycleOutcome, RawBeacon, SensorSuite, StaticReadings};
pub use frame::{ExternalFields, TelemetryFrame};
