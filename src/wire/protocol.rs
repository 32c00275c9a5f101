//! # Wire Protocol Constants and Types
//!
//! Core definitions for the textual device/server protocol.
//!
//! Every frame is ASCII. Device frames start with `+` (heartbeat) or `@`
//! (replies), server frames start with `$` (commands). Fields are separated
//! by `,` and frames end with CRLF, except the log reply (STX/ETX framed) and
//! the end-of-drain marker (a lone EOT byte).

use thiserror::Error;

/// Protocol version announced in every heartbeat
pub const PROTOCOL_VERSION: u32 = 1;

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Start-of-text byte opening the log payload
pub const STX: u8 = 0x02;

/// End-of-text byte closing the log payload
pub const ETX: u8 = 0x03;

/// End-of-transmission byte closing a queue drain
pub const EOT: u8 = 0x04;

/// Field separator
pub const FIELD_SEPARATOR: char = ',';

/// Whether a free-text value can travel as one positional field:
/// printable ASCII without the field separator.
pub fn is_field_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| (c.is_ascii_graphic() || c == ' ') && c != FIELD_SEPARATOR)
}

/// Device frame tags
pub const TAG_HEARTBEAT: &str = "+HRT";
pub const TAG_TELEMETRY: &str = "@TEL";
pub const TAG_CONFIG: &str = "@CFG";
pub const TAG_LOG: &str = "@log";

/// Server command names
pub const CMD_DRAIN_QUEUE: &str = "$TEL";
pub const CMD_READ_CONFIG: &str = "$RCF";
pub const CMD_WRITE_CONFIG: &str = "$WCF";
pub const CMD_FETCH_LOG: &str = "$LOG";

/// Keep-alive token value meaning "another command follows"
pub const KEEP_ALIVE_ON: &str = "1";
pub const KEEP_ALIVE_OFF: &str = "0";

/// Largest command frame the device will buffer
pub const MAX_COMMAND_FRAME_SIZE: usize = 4096;

/// Number of comma-separated slots after the `@TEL` tag
pub const TELEMETRY_SLOTS: usize = 28;

/// Index (among the slots after `@TEL`) of the reserved, always-empty slot
pub const TELEMETRY_RESERVED_SLOT: usize = 17;

/// Frame codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    /// Unrecognized or undecodable command frame
    ///
    /// Carries the keep-alive flag of the offending frame so the caller can
    /// decide whether the connection stays open.
    #[error("Malformed frame: unrecognized command {command:?}")]
    MalformedFrame { command: String, keep_alive: bool },

    /// Frame tag does not match what was expected
    #[error("Unexpected frame tag: expected {expected}, got {actual:?}")]
    UnexpectedTag { expected: &'static str, actual: String },

    /// Wrong number of fields
    #[error("Field count mismatch: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    /// A field could not be parsed
    #[error("Invalid value {token:?} for field {field}")]
    InvalidField { field: &'static str, token: String },

    /// Frame is not ASCII text
    #[error("Frame is not ASCII")]
    NotAscii,

    /// Buffered frame exceeded the size limit without a terminator
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Terminator mode used to find frame boundaries.
///
/// Always chosen explicitly by the caller; the codec never infers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Frame ends with CRLF
    Line,
    /// Frame ends with a single EOT byte (queue drain)
    BinaryDrain,
}

impl FrameMode {
    pub fn terminator(self) -> &'static [u8] {
        match self {
            FrameMode::Line => CRLF,
            FrameMode::BinaryDrain => &[EOT],
        }
    }
}

/// Server request carried by a command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `$TEL`: send every queued telemetry frame then EOT
    DrainQueue,
    /// `$RCF`: reply with the config record
    ReadConfig,
    /// `$WCF`: merge the positional field tokens into the config record
    WriteConfig(Vec<String>),
    /// `$LOG`: reply with the device log
    FetchLog,
}

/// A decoded server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    /// Server will send another command on this connection
    pub keep_alive: bool,
}

impl Command {
    pub fn new(kind: CommandKind, keep_alive: bool) -> Self {
        Self { kind, keep_alive }
    }

    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self.kind {
            CommandKind::DrainQueue => CMD_DRAIN_QUEUE,
            CommandKind::ReadConfig => CMD_READ_CONFIG,
            CommandKind::WriteConfig(_) => CMD_WRITE_CONFIG,
            CommandKind::FetchLog => CMD_FETCH_LOG,
        }
    }
}

/// Heartbeat announcing the device and its queue depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFrame {
    pub pending_count: usize,
    pub device_id: String,
    pub protocol_version: u32,
}
