//! # Logging Module
//!
//! Installs the tracing subscriber and manages the on-device log files.
//!
//! The device log is a plain text file named `log` in the log directory.
//! Once it grows past the configured size it is moved to `log_old` at the
//! next start, replacing any previous `log_old`. The server can fetch both
//! through the `$LOG` command.

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, TrackerError};
use crate::store::{ByteStore, StoreError};

/// Current log file name
pub const LOG_ENTRY: &str = "log";

/// Rotated log file name
pub const OLD_LOG_ENTRY: &str = "log_old";

/// Map the config record's log level to a filter.
///
/// 0 = off, 1 = error, 2 = info, 3 (or above) = debug.
pub fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Install the global subscriber.
///
/// Events go to stderr and, without ANSI colors, to `log_dir/log`. `RUST_LOG`
/// overrides the level derived from `log_level`. The returned guard flushes
/// the file writer on drop and must be held for the life of the process.
pub fn init(log_dir: &Path, log_level: u8) -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_ENTRY);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(log_level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|e| TrackerError::Logging(e.to_string()))?;

    Ok(guard)
}

/// Read access and rotation for the device log files.
#[derive(Debug)]
pub struct LogArchive<S> {
    store: S,
}

impl<S: ByteStore> LogArchive<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn read_entry(&self, name: &str) -> Vec<u8> {
        match self.store.read(name) {
            Ok(data) => data.unwrap_or_default(),
            Err(e) => {
                error!("Failed to read log file {}: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Contents of `log` followed by `log_old`. Missing files read as empty.
    pub fn read_all(&self) -> Vec<u8> {
        let mut contents = self.read_entry(LOG_ENTRY);
        contents.extend(self.read_entry(OLD_LOG_ENTRY));
        contents
    }

    /// Move `log` to `log_old` if it has reached `max_bytes`.
    ///
    /// Returns whether a rotation happened.
    pub fn rotate_if_needed(&self, max_bytes: u64) -> std::result::Result<bool, StoreError> {
        let size = self
            .store
            .size(LOG_ENTRY)
            .map_err(|e| StoreError::io(LOG_ENTRY, e))?
            .unwrap_or(0);

        if size == 0 || size < max_bytes {
            return Ok(false);
        }

        self.store
            .remove(OLD_LOG_ENTRY)
            .map_err(|e| StoreError::io(OLD_LOG_ENTRY, e))?;
        self.store
            .rename(LOG_ENTRY, OLD_LOG_ENTRY)
            .map_err(|e| StoreError::io(LOG_ENTRY, e))?;
        info!(size, "Rotated device log");
        Ok(true)
    }
}
