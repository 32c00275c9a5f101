//! # Wire Protocol Module
//!
//! Implementation of the line-oriented device/server telemetry protocol.
//!
//! This module handles:
//! - Heartbeat, telemetry, config and log reply encoding
//! - Server command decoding with keep-alive handling
//! - Frame boundary detection in line and binary-drain modes

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use protocol::{Command, CommandKind, FrameError, FrameMode, HeartbeatFrame};
