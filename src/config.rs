//! # Configuration Module
//!
//! Handles loading and validating the bootstrap device configuration from
//! TOML files.
//!
//! This is the host-side configuration the binary needs before it can open
//! any store. Operational settings (server, sleep interval, alerts) live in
//! the persisted [`ConfigRecord`] and can be changed by the server; the
//! optional `[defaults]` table seeds that record when nothing is stored yet.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackerError};
use crate::store::ConfigRecord;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub device: DeviceSection,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sensors: SensorsConfig,

    /// Seed values for the persisted config record
    #[serde(default)]
    pub defaults: Option<ConfigRecord>,
}

/// Device identity
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSection {
    /// Unique id announced in every heartbeat (uppercase hex)
    pub id: String,
}

/// On-disk locations
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_queue_file")]
    pub queue_file: String,

    #[serde(default = "default_config_file")]
    pub config_file: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

/// Sensor sources for host runs
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsConfig {
    /// JSON file of static readings
    #[serde(default)]
    pub fixture: Option<String>,
}

fn default_data_dir() -> String { "./data".to_string() }
fn default_queue_file() -> String { "queue".to_string() }
fn default_config_file() -> String { "config".to_string() }
fn default_log_dir() -> String { "./data".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            queue_file: default_queue_file(),
            config_file: default_config_file(),
            log_dir: default_log_dir(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(message))
}

impl DeviceConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tracker_link::config::DeviceConfig;
    ///
    /// let config = DeviceConfig::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Record used when nothing (or only part of it) is persisted
    pub fn record_defaults(&self) -> ConfigRecord {
        self.defaults.clone().unwrap_or_default()
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.log_dir)
    }

    fn validate(&self) -> Result<()> {
        let id = &self.device.id;
        if id.is_empty() {
            return Err(invalid("device id cannot be empty"));
        }
        if !id.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)) {
            return Err(invalid(format!("device id {:?} must be uppercase hex", id)));
        }

        for (name, value) in [
            ("data_dir", &self.storage.data_dir),
            ("queue_file", &self.storage.queue_file),
            ("config_file", &self.storage.config_file),
            ("log_dir", &self.storage.log_dir),
        ] {
            if value.is_empty() {
                return Err(invalid(format!("storage {} cannot be empty", name)));
            }
        }

        if self.storage.queue_file == self.storage.config_file {
            return Err(invalid("queue_file and config_file must differ"));
        }

        if let Some(fixture) = &self.sensors.fixture {
            if fixture.is_empty() {
                return Err(invalid("sensors fixture cannot be empty when set"));
            }
        }

        if let Some(defaults) = &self.defaults {
            defaults
                .validate()
                .map_err(|e| invalid(format!("defaults: {}", e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> DeviceConfig {
        DeviceConfig {
            device: DeviceSection {
                id: "240AC4A1B2C3".to_string(),
            },
            storage: StorageConfig::default(),
            sensors: SensorsConfig::default(),
            defaults: None,
        }
    }

    fn load_str(toml_content: &str) -> Result<DeviceConfig> {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        DeviceConfig::load(temp_file.path())
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.record_defaults(), ConfigRecord::default());
        assert_eq!(config.data_dir(), PathBuf::from("./data"));
    }

    #[test]
    fn test_load_config_from_file() {
        let config = load_str(
            r#"
[device]
id = "240AC4A1B2C3"
"#,
        )
        .unwrap();
        assert_eq!(config.device.id, "240AC4A1B2C3");
        assert_eq!(config.storage.queue_file, "queue");
        assert!(config.sensors.fixture.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let config = load_str(
            r#"
[device]
id = "ABCDEF012345"

[storage]
data_dir = "/var/lib/tracker"
queue_file = "outbox"
config_file = "settings"
log_dir = "/var/log/tracker"

[sensors]
fixture = "readings.json"

[defaults]
sleep_seconds = 120
server_address = "collector.local"
server_port = 9000
temp_alert_enabled = true
"#,
        )
        .unwrap();

        assert_eq!(config.storage.queue_file, "outbox");
        assert_eq!(config.log_dir(), PathBuf::from("/var/log/tracker"));
        assert_eq!(config.sensors.fixture.as_deref(), Some("readings.json"));

        let record = config.record_defaults();
        assert_eq!(record.sleep_seconds, 120);
        assert_eq!(record.server_address, "collector.local");
        assert_eq!(record.server_port, 9000);
        assert!(record.temp_alert_enabled);
        assert_eq!(record.log_level, 2);
    }

    #[test]
    fn test_defaults_accept_integer_flags() {
        let config = load_str(
            r#"
[device]
id = "240AC4A1B2C3"

[defaults]
temp_alert_enabled = 1
ruuvi_enabled = 0
"#,
        )
        .unwrap();
        let record = config.record_defaults();
        assert!(record.temp_alert_enabled);
        assert!(!record.ruuvi_enabled);
    }

    #[test]
    fn test_missing_device_section() {
        assert!(matches!(load_str("[storage]\n"), Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_invalid_device_id() {
        let mut config = create_valid_config();
        config.device.id = "240ac4a1b2c3".to_string();
        assert!(config.validate().is_err());

        config.device.id = String::new();
        assert!(config.validate().is_err());

        config.device.id = "XYZ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_storage_path() {
        let mut config = create_valid_config();
        config.storage.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_and_config_must_differ() {
        let mut config = create_valid_config();
        config.storage.config_file = "queue".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_defaults_rejected() {
        let result = load_str(
            r#"
[device]
id = "240AC4A1B2C3"

[defaults]
log_level = 7
"#,
        );
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_defaults_reject_separator_in_text() {
        let result = load_str(
            r#"
[device]
id = "240AC4A1B2C3"

[defaults]
server_address = "collector.local,9000"
"#,
        );
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = DeviceConfig::load("/nonexistent/tracker.toml");
        assert!(matches!(result, Err(TrackerError::Io(_))));
    }
}
