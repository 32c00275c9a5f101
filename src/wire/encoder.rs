//! # Frame Encoder
//!
//! Builds device frames (heartbeat, telemetry, config, log) and server
//! command frames.
//!
//! Numeric fields that are unavailable serialize as an empty string so every
//! frame keeps its positional layout. Floating point values use Rust's
//! shortest round-trip representation with a trailing `.0` for whole numbers
//! (`-10.0`, `26.5`), which is what older consumers expect.

use std::fmt::Display;

use chrono::SecondsFormat;

use super::protocol::*;
use crate::store::config_record::ConfigRecord;
use crate::telemetry::frame::TelemetryFrame;

/// Encode a heartbeat frame.
///
/// # Examples
///
/// ```
/// use tracker_link::wire::encoder::encode_heartbeat;
///
/// assert_eq!(encode_heartbeat(2, "240AC4A1B2C3", 1), b"+HRT,2,240AC4A1B2C3,1\r\n");
/// ```
pub fn encode_heartbeat(pending_count: usize, device_id: &str, protocol_version: u32) -> Vec<u8> {
    format!(
        "{},{},{},{}\r\n",
        TAG_HEARTBEAT, pending_count, device_id, protocol_version
    )
    .into_bytes()
}

impl HeartbeatFrame {
    pub fn encode(&self) -> Vec<u8> {
        encode_heartbeat(self.pending_count, &self.device_id, self.protocol_version)
    }
}

pub(crate) fn float(value: f64) -> String {
    format!("{:?}", value)
}

fn opt_float(value: Option<f64>) -> String {
    value.map(float).unwrap_or_default()
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

/// Telemetry slots after the `@TEL` tag, in wire order.
pub fn telemetry_slots(frame: &TelemetryFrame) -> Vec<String> {
    let ex = &frame.external;
    let mut slots = Vec::with_capacity(TELEMETRY_SLOTS);

    slots.push(
        frame
            .timestamp
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_default(),
    );
    slots.push(opt_float(frame.latitude));
    slots.push(opt_float(frame.longitude));
    slots.push(opt_float(frame.course));
    slots.push(opt_float(frame.speed));
    slots.push(opt_float(frame.battery_voltage));
    slots.push(flag(frame.activity_alert));
    slots.extend(frame.acceleration.iter().map(|v| opt_float(*v)));
    slots.push(flag(frame.temperature_alert));
    slots.extend(frame.temperatures.iter().map(|v| opt_float(*v)));
    // Reserved slot, kept empty for positional compatibility
    slots.push(String::new());
    slots.push(ex.sensor_type.to_string());
    slots.push(ex.uid.clone().unwrap_or_default());
    slots.extend(ex.acceleration.iter().map(|v| opt(*v)));
    slots.push(opt_float(ex.humidity));
    slots.push(opt_float(ex.temperature));
    slots.push(opt(ex.pressure));
    slots.push(opt(ex.battery_mv));
    slots.push(opt(ex.tx_power_dbm));

    debug_assert_eq!(slots.len(), TELEMETRY_SLOTS);
    debug_assert!(slots[TELEMETRY_RESERVED_SLOT].is_empty());
    slots
}

/// Encode a telemetry frame: `@TEL,` + 28 slots + CRLF.
pub fn encode_telemetry(frame: &TelemetryFrame) -> Vec<u8> {
    let mut out = String::with_capacity(192);
    out.push_str(TAG_TELEMETRY);
    for slot in telemetry_slots(frame) {
        out.push(FIELD_SEPARATOR);
        out.push_str(&slot);
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Encode a config snapshot: `@CFG,` + ordered fields + CRLF.
pub fn encode_config(record: &ConfigRecord) -> Vec<u8> {
    let mut out = String::from(TAG_CONFIG);
    for value in record.wire_values() {
        out.push(FIELD_SEPARATOR);
        out.push_str(&value);
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Encode a log reply: `@log,{size}\r\n` STX contents ETX.
///
/// There is no CRLF after ETX.
pub fn encode_log(size: usize, contents: &[u8]) -> Vec<u8> {
    let header = format!("{},{}\r\n", TAG_LOG, size);
    let mut out = Vec::with_capacity(header.len() + contents.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.push(STX);
    out.extend_from_slice(contents);
    out.push(ETX);
    out
}

/// Encode a server command frame. The keep-alive token is always written.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut out = String::from(command.name());
    out.push(FIELD_SEPARATOR);
    out.push_str(if command.keep_alive { KEEP_ALIVE_ON } else { KEEP_ALIVE_OFF });
    if let CommandKind::WriteConfig(tokens) = &command.kind {
        for token in tokens {
            out.push(FIELD_SEPARATOR);
            out.push_str(token);
        }
    }
    out.push_str("\r\n");
    out.into_bytes()
}
