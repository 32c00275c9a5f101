//! # Persistence Module
//!
//! Durable state that survives power loss between wake cycles.
//!
//! This module handles:
//! - The byte-store abstraction the other stores are built on
//! - The store-and-forward telemetry queue
//! - The persisted configuration record
//!
//! Stores are keyed by a relative name (`"queue"`, `"config"`, `"log"`).
//! They are not safe for concurrent access; one wake cycle owns them.

pub mod config_record;
pub mod queue;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

pub use config_record::{ConfigRecord, ConfigStore};
pub use queue::FrameQueue;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage failed
    #[error("Storage I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Frame rejected by the queue
    #[error("Invalid queue frame: {0}")]
    InvalidFrame(String),

    /// Persisted record could not be serialized
    #[error("Record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(name: &str, source: io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

/// Append/read/delete byte storage keyed by name.
///
/// `read` returns `Ok(None)` when nothing is stored under `name`.
#[cfg_attr(test, mockall::automock)]
pub trait ByteStore {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Append bytes durably, creating the entry if needed
    fn append(&self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Replace the entry atomically
    fn write(&self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Remove the entry. Removing a missing entry is not an error.
    fn remove(&self, name: &str) -> io::Result<()>;

    /// Size in bytes, `None` when absent
    fn size(&self, name: &str) -> io::Result<Option<u64>>;

    /// Rename an entry, replacing any existing target
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
}

impl<S: ByteStore + ?Sized> ByteStore for &S {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).read(name)
    }

    fn append(&self, name: &str, data: &[u8]) -> io::Result<()> {
        (**self).append(name, data)
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        (**self).write(name, data)
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        (**self).remove(name)
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        (**self).size(name)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        (**self).rename(from, to)
    }
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Byte store backed by files in one directory.
#[derive(Debug, Clone)]
pub struct FsByteStore {
    root: PathBuf,
}

impl FsByteStore {
    /// Open (and create if needed) the store directory
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("Opened byte store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ByteStore for FsByteStore {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        not_found_as_none(fs::read(self.path(name)))
    }

    fn append(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        file.write_all(data)?;
        file.sync_data()
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let tmp = self.path(&format!("{}.tmp", name));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_data()?;
        }
        fs::rename(&tmp, self.path(name))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        not_found_as_none(fs::remove_file(self.path(name))).map(|_| ())
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        not_found_as_none(fs::metadata(self.path(name))).map(|meta| meta.map(|m| m.len()))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }
}

/// In-memory byte store.
///
/// Clones share the same entries, so a test can keep a handle and inspect
/// what a component persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryByteStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store lock poisoned"))
    }

    /// Whether an entry exists under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries().map(|e| e.contains_key(name)).unwrap_or(false)
    }
}

impl ByteStore for MemoryByteStore {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(name).cloned())
    }

    fn append(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.entries()?
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.entries()?.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.entries()?.remove(name);
        Ok(())
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        Ok(self.entries()?.get(name).map(|v| v.len() as u64))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut entries = self.entries()?;
        let data = entries
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.to_string()))?;
        entries.insert(to.to_string(), data);
        Ok(())
    }
}
