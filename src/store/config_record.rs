//! # Config Store
//!
//! The persisted device configuration record and its wire form.
//!
//! The record always has a value for every field. On the wire it travels as
//! 19 positional fields in [`FIELD_NAMES`] order; on disk it is a JSON object
//! keyed by field name.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{ByteStore, StoreError};
use crate::link::Endpoint;
use crate::wire::encoder::float;
use crate::wire::protocol::is_field_safe;

/// Default entry name of the record in its byte store
pub const CONFIG_ENTRY: &str = "config";

/// Wire order of the record fields
pub const FIELD_NAMES: [&str; 19] = [
    "log_level",
    "log_file_size",
    "sleep_seconds",
    "server_address",
    "server_port",
    "server_use_ssl",
    "server_timeout",
    "apn",
    "lte_timeout",
    "gps_timeout",
    "ruuvi_enabled",
    "ruuvi_mac",
    "ruuvi_timeout",
    "temp_alert_low",
    "temp_alert_high",
    "temp_alert_enabled",
    "acc_alert_enabled",
    "acc_alert_threshold",
    "acc_alert_duration",
];

/// Highest supported log level (debug)
pub const MAX_LOG_LEVEL: u8 = 3;

/// Config record validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Token could not be parsed or is out of range for its field
    #[error("Invalid value {token:?} for config field {field}")]
    InvalidFieldValue { field: &'static str, token: String },

    /// Update carries more positional tokens than the record has fields
    #[error("Too many config fields: expected at most {max}, got {actual}")]
    TooManyFields { max: usize, actual: usize },
}

fn default_log_level() -> u8 {
    2
}

fn default_log_file_size() -> u32 {
    1
}

fn default_sleep_seconds() -> u32 {
    30
}

fn default_server_address() -> String {
    "trackensure.com".to_string()
}

fn default_server_port() -> u16 {
    8883
}

fn default_server_timeout() -> u32 {
    10
}

fn default_apn() -> String {
    "iot.aer.net".to_string()
}

fn default_lte_timeout() -> u32 {
    10
}

fn default_gps_timeout() -> u32 {
    15
}

fn default_ruuvi_mac() -> String {
    "FFFFFFFFFFFF".to_string()
}

fn default_ruuvi_timeout() -> u32 {
    5
}

fn default_temp_alert_low() -> f64 {
    -10.0
}

fn default_temp_alert_high() -> f64 {
    50.0
}

fn default_acc_alert_threshold() -> u32 {
    200
}

fn default_acc_alert_duration() -> u32 {
    300
}

/// On/off fields are stored as 0/1; `true`/`false` is accepted on input.
mod int_flag {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Flag::deserialize(deserializer)? {
            Flag::Bool(value) => Ok(value),
            Flag::Int(0) => Ok(false),
            Flag::Int(1) => Ok(true),
            Flag::Int(other) => Err(D::Error::custom(format!("flag must be 0 or 1, got {}", other))),
        }
    }
}

/// Device configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// 0 = off, 1 = error, 2 = info, 3 = debug
    #[serde(default = "default_log_level")]
    pub log_level: u8,

    /// Log size (MB) at which the log file is rotated
    #[serde(default = "default_log_file_size")]
    pub log_file_size: u32,

    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: u32,

    #[serde(default = "default_server_address")]
    pub server_address: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default, with = "int_flag")]
    pub server_use_ssl: bool,

    /// Per-operation transport timeout in seconds
    #[serde(default = "default_server_timeout")]
    pub server_timeout: u32,

    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default = "default_lte_timeout")]
    pub lte_timeout: u32,

    #[serde(default = "default_gps_timeout")]
    pub gps_timeout: u32,

    #[serde(default, with = "int_flag")]
    pub ruuvi_enabled: bool,

    #[serde(default = "default_ruuvi_mac")]
    pub ruuvi_mac: String,

    #[serde(default = "default_ruuvi_timeout")]
    pub ruuvi_timeout: u32,

    #[serde(default = "default_temp_alert_low")]
    pub temp_alert_low: f64,

    #[serde(default = "default_temp_alert_high")]
    pub temp_alert_high: f64,

    #[serde(default, with = "int_flag")]
    pub temp_alert_enabled: bool,

    #[serde(default, with = "int_flag")]
    pub acc_alert_enabled: bool,

    /// Activity threshold in mg
    #[serde(default = "default_acc_alert_threshold")]
    pub acc_alert_threshold: u32,

    /// Activity duration in ms
    #[serde(default = "default_acc_alert_duration")]
    pub acc_alert_duration: u32,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file_size: default_log_file_size(),
            sleep_seconds: default_sleep_seconds(),
            server_address: default_server_address(),
            server_port: default_server_port(),
            server_use_ssl: false,
            server_timeout: default_server_timeout(),
            apn: default_apn(),
            lte_timeout: default_lte_timeout(),
            gps_timeout: default_gps_timeout(),
            ruuvi_enabled: false,
            ruuvi_mac: default_ruuvi_mac(),
            ruuvi_timeout: default_ruuvi_timeout(),
            temp_alert_low: default_temp_alert_low(),
            temp_alert_high: default_temp_alert_high(),
            temp_alert_enabled: false,
            acc_alert_enabled: false,
            acc_alert_threshold: default_acc_alert_threshold(),
            acc_alert_duration: default_acc_alert_duration(),
        }
    }
}

fn invalid(field: &'static str, token: &str) -> ConfigError {
    ConfigError::InvalidFieldValue {
        field,
        token: token.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(field: &'static str, token: &str) -> Result<T, ConfigError> {
    token.parse().map_err(|_| invalid(field, token))
}

fn parse_flag(field: &'static str, token: &str) -> Result<bool, ConfigError> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(invalid(field, token)),
    }
}

fn parse_text(field: &'static str, token: &str) -> Result<String, ConfigError> {
    if !is_field_safe(token) {
        return Err(invalid(field, token));
    }
    Ok(token.to_string())
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

impl ConfigRecord {
    /// Field values in wire order
    pub fn wire_values(&self) -> Vec<String> {
        vec![
            self.log_level.to_string(),
            self.log_file_size.to_string(),
            self.sleep_seconds.to_string(),
            self.server_address.clone(),
            self.server_port.to_string(),
            flag(self.server_use_ssl),
            self.server_timeout.to_string(),
            self.apn.clone(),
            self.lte_timeout.to_string(),
            self.gps_timeout.to_string(),
            flag(self.ruuvi_enabled),
            self.ruuvi_mac.clone(),
            self.ruuvi_timeout.to_string(),
            float(self.temp_alert_low),
            float(self.temp_alert_high),
            flag(self.temp_alert_enabled),
            flag(self.acc_alert_enabled),
            self.acc_alert_threshold.to_string(),
            self.acc_alert_duration.to_string(),
        ]
    }

    /// Set one field from its wire token, validating type and range.
    fn set_field(&mut self, index: usize, token: &str) -> Result<(), ConfigError> {
        let field = FIELD_NAMES[index];
        match index {
            0 => {
                let level: u8 = parse_num(field, token)?;
                if level > MAX_LOG_LEVEL {
                    return Err(invalid(field, token));
                }
                self.log_level = level;
            }
            1 => self.log_file_size = parse_num(field, token)?,
            2 => self.sleep_seconds = parse_num(field, token)?,
            3 => self.server_address = parse_text(field, token)?,
            4 => {
                let port: u16 = parse_num(field, token)?;
                if port == 0 {
                    return Err(invalid(field, token));
                }
                self.server_port = port;
            }
            5 => self.server_use_ssl = parse_flag(field, token)?,
            6 => {
                let timeout: u32 = parse_num(field, token)?;
                if timeout == 0 {
                    return Err(invalid(field, token));
                }
                self.server_timeout = timeout;
            }
            7 => self.apn = parse_text(field, token)?,
            8 => self.lte_timeout = parse_num(field, token)?,
            9 => self.gps_timeout = parse_num(field, token)?,
            10 => self.ruuvi_enabled = parse_flag(field, token)?,
            11 => self.ruuvi_mac = parse_text(field, token)?,
            12 => self.ruuvi_timeout = parse_num(field, token)?,
            13 | 14 => {
                let value: f64 = parse_num(field, token)?;
                if !value.is_finite() {
                    return Err(invalid(field, token));
                }
                if index == 13 {
                    self.temp_alert_low = value;
                } else {
                    self.temp_alert_high = value;
                }
            }
            15 => self.temp_alert_enabled = parse_flag(field, token)?,
            16 => self.acc_alert_enabled = parse_flag(field, token)?,
            17 => self.acc_alert_threshold = parse_num(field, token)?,
            _ => self.acc_alert_duration = parse_num(field, token)?,
        }
        Ok(())
    }

    /// Apply positional update tokens, returning the merged record.
    ///
    /// Empty tokens keep the current value and missing trailing tokens count
    /// as empty. `self` is never modified, so a failed merge leaves nothing
    /// half-applied.
    ///
    /// # Errors
    ///
    /// - `InvalidFieldValue` naming the first token that fails to parse or
    ///   is out of range
    /// - `TooManyFields` if more than 19 tokens are given
    pub fn merged<T: AsRef<str>>(&self, tokens: &[T]) -> Result<ConfigRecord, ConfigError> {
        if tokens.len() > FIELD_NAMES.len() {
            return Err(ConfigError::TooManyFields {
                max: FIELD_NAMES.len(),
                actual: tokens.len(),
            });
        }

        let mut merged = self.clone();
        for (index, token) in tokens.iter().enumerate() {
            let token = token.as_ref();
            if token.is_empty() {
                continue;
            }
            merged.set_field(index, token)?;
        }
        Ok(merged)
    }

    /// Check the range constraints the wire parser enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level > MAX_LOG_LEVEL {
            return Err(invalid("log_level", &self.log_level.to_string()));
        }
        if self.server_port == 0 {
            return Err(invalid("server_port", "0"));
        }
        if self.server_timeout == 0 {
            return Err(invalid("server_timeout", "0"));
        }
        for (field, value) in [
            ("server_address", &self.server_address),
            ("apn", &self.apn),
            ("ruuvi_mac", &self.ruuvi_mac),
        ] {
            parse_text(field, value)?;
        }
        if !self.temp_alert_low.is_finite() {
            return Err(invalid("temp_alert_low", &float(self.temp_alert_low)));
        }
        if !self.temp_alert_high.is_finite() {
            return Err(invalid("temp_alert_high", &float(self.temp_alert_high)));
        }
        Ok(())
    }

    /// Server endpoint derived from the record
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.server_address.clone(),
            port: self.server_port,
            timeout: Duration::from_secs(u64::from(self.server_timeout)),
            use_tls: self.server_use_ssl,
        }
    }

    /// Log rotation threshold in bytes
    pub fn log_rotate_bytes(&self) -> u64 {
        u64::from(self.log_file_size) * 1024 * 1024
    }
}

/// Merge positional update tokens into `current`.
///
/// See [`ConfigRecord::merged`].
pub fn merge<T: AsRef<str>>(current: &ConfigRecord, tokens: &[T]) -> Result<ConfigRecord, ConfigError> {
    current.merged(tokens)
}

/// Persisted config record over a [`ByteStore`].
#[derive(Debug)]
pub struct ConfigStore<S> {
    store: S,
    entry: String,
}

impl<S: ByteStore> ConfigStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_entry(store, CONFIG_ENTRY)
    }

    pub fn with_entry(store: S, entry: impl Into<String>) -> Self {
        Self {
            store,
            entry: entry.into(),
        }
    }

    /// Load the record: start from `defaults` and overlay persisted fields.
    ///
    /// A missing, empty, unreadable or corrupt record yields `defaults`.
    /// Individual persisted fields with the wrong type or out of range are
    /// skipped. Unknown keys are ignored.
    pub fn load(&self, defaults: &ConfigRecord) -> ConfigRecord {
        let data = match self.store.read(&self.entry) {
            Ok(Some(data)) if !data.is_empty() => data,
            Ok(_) => {
                info!("No stored config record, using defaults");
                return defaults.clone();
            }
            Err(e) => {
                error!("Failed to read config record, using defaults: {}", e);
                return defaults.clone();
            }
        };

        let persisted: Map<String, Value> = match serde_json::from_slice(&data) {
            Ok(map) => map,
            Err(e) => {
                error!("Config record is corrupt, using defaults: {}", e);
                return defaults.clone();
            }
        };

        let mut record = defaults.clone();
        for name in FIELD_NAMES {
            let Some(value) = persisted.get(name) else {
                continue;
            };
            match overlay(&record, name, value.clone()) {
                Some(next) => record = next,
                None => warn!(field = name, "Ignoring invalid stored config value {}", value),
            }
        }
        record
    }

    /// Persist the record, replacing the previous one atomically.
    pub fn save(&self, record: &ConfigRecord) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(record)?;
        self.store
            .write(&self.entry, &data)
            .map_err(|e| StoreError::io(&self.entry, e))
    }
}

fn overlay(record: &ConfigRecord, name: &str, value: Value) -> Option<ConfigRecord> {
    let mut map = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => return None,
    };
    map.insert(name.to_string(), value);
    let candidate: ConfigRecord = serde_json::from_value(Value::Object(map)).ok()?;
    candidate.validate().ok()?;
    Some(candidate)
}
