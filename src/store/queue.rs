//! # Store-and-Forward Queue
//!
//! Durable FIFO of serialized telemetry frames.
//!
//! The backing entry holds the frames back to back, each ending with CRLF.
//! Frames are only ever appended; the whole entry is removed after the server
//! has confirmed a full drain.

use tracing::{debug, error, warn};

use super::{ByteStore, StoreError};
use crate::wire::protocol::{CRLF, EOT};

/// Default entry name of the queue in its byte store
pub const QUEUE_ENTRY: &str = "queue";

/// Persistent telemetry queue over a [`ByteStore`].
#[derive(Debug)]
pub struct FrameQueue<S> {
    store: S,
    entry: String,
}

impl<S: ByteStore> FrameQueue<S> {
    pub fn new(store: S) -> Self {
        Self::with_entry(store, QUEUE_ENTRY)
    }

    pub fn with_entry(store: S, entry: impl Into<String>) -> Self {
        Self {
            store,
            entry: entry.into(),
        }
    }

    /// Durably append one serialized frame.
    ///
    /// A torn fragment left at the end of the entry by an interrupted append
    /// is cut off first, so the new frame always starts on its own line.
    ///
    /// # Errors
    ///
    /// - `InvalidFrame` if the frame does not end with CRLF, contains
    ///   another CRLF, or contains non-ASCII or EOT bytes
    /// - `Io` if the store write fails
    pub fn append(&self, frame: &[u8]) -> Result<(), StoreError> {
        validate_frame(frame)?;
        self.truncate_torn_tail()?;
        self.store
            .append(&self.entry, frame)
            .map_err(|e| StoreError::io(&self.entry, e))?;
        debug!(bytes = frame.len(), "Queued telemetry frame");
        Ok(())
    }

    /// Every queued frame in insertion order, CRLF included.
    ///
    /// A missing or empty entry is normal and yields no frames. An unreadable
    /// or corrupt entry is logged and also yields no frames.
    pub fn read_all(&self) -> Vec<Vec<u8>> {
        let data = match self.store.read(&self.entry) {
            Ok(Some(data)) => data,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Failed to read telemetry queue: {}", e);
                return Vec::new();
            }
        };

        if !data.is_ascii() {
            error!(bytes = data.len(), "Telemetry queue is corrupt (non-ASCII data), ignoring it");
            return Vec::new();
        }

        let mut frames = Vec::new();
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            match rest.windows(CRLF.len()).position(|w| w == CRLF) {
                Some(pos) => {
                    let (frame, tail) = rest.split_at(pos + CRLF.len());
                    frames.push(frame.to_vec());
                    rest = tail;
                }
                None => {
                    warn!(bytes = rest.len(), "Dropping torn trailing fragment from telemetry queue");
                    break;
                }
            }
        }
        frames
    }

    fn truncate_torn_tail(&self) -> Result<(), StoreError> {
        let data = match self.store.read(&self.entry) {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Could not check telemetry queue tail before append: {}", e);
                return Ok(());
            }
        };
        if data.is_empty() || data.ends_with(CRLF) {
            return Ok(());
        }

        let keep = data
            .windows(CRLF.len())
            .rposition(|w| w == CRLF)
            .map_or(0, |pos| pos + CRLF.len());
        warn!(
            bytes = data.len() - keep,
            "Truncating torn trailing fragment from telemetry queue"
        );
        self.store
            .write(&self.entry, &data[..keep])
            .map_err(|e| StoreError::io(&self.entry, e))
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.read_all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the whole backing entry.
    ///
    /// Only call this after the server has received every frame.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store
            .remove(&self.entry)
            .map_err(|e| StoreError::io(&self.entry, e))
    }
}

fn validate_frame(frame: &[u8]) -> Result<(), StoreError> {
    let body = frame
        .strip_suffix(CRLF)
        .ok_or_else(|| StoreError::InvalidFrame("missing CRLF terminator".to_string()))?;
    if body.windows(CRLF.len()).any(|w| w == CRLF) {
        return Err(StoreError::InvalidFrame("interior CRLF".to_string()));
    }
    if !body.is_ascii() || body.contains(&EOT) {
        return Err(StoreError::InvalidFrame("non-ASCII or EOT byte".to_string()));
    }
    Ok(())
}
