//! # Tracker Link
//!
//! Runs one wake cycle of the asset tracker on a host machine.
//!
//! Readings come from a JSON fixture instead of hardware; the queue, config
//! record and log live in ordinary files. The process exits after the
//! session and reports how long the device would sleep.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

use tracker_link::config::DeviceConfig;
use tracker_link::link::TcpConnector;
use tracker_link::logging::{self, LogArchive};
use tracker_link::session::DeviceIdentity;
use tracker_link::store::{ConfigStore, FrameQueue, FsByteStore};
use tracker_link::telemetry::cycle::Device;
use tracker_link::telemetry::{run_cycle, StaticReadings};

/// Config file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn config_path(mut args: impl Iterator<Item = String>) -> PathBuf {
    PathBuf::from(args.nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()))
}

fn open_device(config: &DeviceConfig) -> Result<Device<FsByteStore, FsByteStore, FsByteStore>> {
    let data = FsByteStore::open(config.data_dir())
        .with_context(|| format!("opening data directory {}", config.storage.data_dir))?;
    let logs = FsByteStore::open(config.log_dir())
        .with_context(|| format!("opening log directory {}", config.storage.log_dir))?;

    Ok(Device {
        identity: DeviceIdentity::new(config.device.id.as_str()),
        queue: FrameQueue::with_entry(data.clone(), config.storage.queue_file.as_str()),
        config: ConfigStore::with_entry(data, config.storage.config_file.as_str()),
        logs: LogArchive::new(logs),
    })
}

fn load_sensors(config: &DeviceConfig) -> StaticReadings {
    let Some(path) = &config.sensors.fixture else {
        warn!("No sensor fixture configured, every reading will be absent");
        return StaticReadings::default();
    };
    match StaticReadings::load(path) {
        Ok(readings) => readings,
        Err(e) => {
            error!("Failed to load sensor fixture {}: {}", path, e);
            StaticReadings::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let path = config_path(std::env::args());
    let config = DeviceConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;

    let device = open_device(&config)?;
    let record = device.config.load(&config.record_defaults());

    // Rotate before the appender opens the log file
    let rotated = device.logs.rotate_if_needed(record.log_rotate_bytes());
    let _guard = logging::init(&config.log_dir(), record.log_level)?;

    info!("Tracker Link v{} starting...", env!("CARGO_PKG_VERSION"));
    match rotated {
        Ok(true) => info!("Rotated device log"),
        Ok(false) => {}
        Err(e) => error!("Log rotation failed: {}", e),
    }

    let mut sensors = load_sensors(&config);
    let outcome = run_cycle(&device, &mut sensors, record, &TcpConnector).await;

    match &outcome.session {
        Ok(report) => info!(
            commands = report.commands.len(),
            drained = report.frames_drained,
            "Session succeeded"
        ),
        Err(e) => warn!("Session failed, {} frame(s) stay queued: {}", device.queue.len(), e),
    }
    info!("Sleeping for {}s", outcome.sleep_seconds);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn config_in(dir: &TempDir, extra: &str) -> DeviceConfig {
        let content = format!(
            "[device]\nid = \"240AC4A1B2C3\"\n\n[storage]\ndata_dir = \"{}\"\nlog_dir = \"{}\"\n{}",
            dir.path().join("data").display(),
            dir.path().join("logs").display(),
            extra
        );
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        DeviceConfig::load(file.path()).unwrap()
    }

    #[test]
    fn test_config_path_default() {
        let args = vec!["tracker-link".to_string()];
        assert_eq!(config_path(args.into_iter()), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_config_path_from_args() {
        let args = vec!["tracker-link".to_string(), "/etc/tracker.toml".to_string()];
        assert_eq!(config_path(args.into_iter()), PathBuf::from("/etc/tracker.toml"));
    }

    #[test]
    fn test_open_device_creates_directories() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "");
        let device = open_device(&config).unwrap();

        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("logs").is_dir());
        assert_eq!(device.identity.device_id, "240AC4A1B2C3");
        assert!(device.queue.is_empty());
    }

    #[test]
    fn test_open_device_uses_configured_entries() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "queue_file = \"outbox\"\n");
        let device = open_device(&config).unwrap();

        device.queue.append(b"@TEL,1\r\n").unwrap();
        assert!(dir.path().join("data").join("outbox").exists());
    }

    #[test]
    fn test_missing_fixture_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "\n[sensors]\nfixture = \"/nonexistent/readings.json\"\n");
        let sensors = load_sensors(&config);
        assert!(sensors.battery_voltage.is_none());
        assert!(!sensors.woke_on_activity);
    }
}
