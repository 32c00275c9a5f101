//! # Tracker Link Library
//!
//! Store-and-forward telemetry transport for a battery-powered asset tracker.
//!
//! Each wake cycle the device samples its sensors, appends one telemetry
//! frame to a durable queue and opens a short session with the server. The
//! server drains the queue, reads or rewrites the device configuration and
//! fetches the device log through a small ASCII command protocol.

pub mod collector;
pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod sensor;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod wire;
