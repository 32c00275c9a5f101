//! # Telemetry Session
//!
//! One connect → heartbeat → command loop → close exchange with the server.
//!
//! ```text
//! Idle → Connecting → HeartbeatSent → AwaitingCommand → Dispatching
//!                                          ↑                 │
//!                                          └── keep-alive ───┤
//!                                                            ↓
//!                                                         Closed
//! ```
//!
//! Every transport operation runs under the endpoint timeout. Any transport
//! failure or timeout closes the session with an error and leaves the queue
//! untouched; nothing is retried within the same wake cycle.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::link::{Connector, Transport};
use crate::logging::LogArchive;
use crate::store::{ByteStore, ConfigRecord, ConfigStore, FrameQueue};
use crate::wire::decoder::{decode_frame, FrameAccumulator};
use crate::wire::encoder::{encode_config, encode_heartbeat, encode_log};
use crate::wire::protocol::{EOT, MAX_COMMAND_FRAME_SIZE, PROTOCOL_VERSION};
use crate::wire::{Command, CommandKind, FrameError, FrameMode};

/// Size of a single transport read
const RECV_CHUNK_SIZE: usize = 512;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    HeartbeatSent,
    AwaitingCommand,
    Dispatching,
    Closed,
}

/// Transport failures that end a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not open the connection
    #[error("Connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// An operation exceeded the endpoint timeout
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Transport read or write failed
    #[error("Transport error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Server closed the connection while a command was expected
    #[error("Server closed the connection")]
    Disconnected,

    /// Server sent more than the command buffer holds without a terminator
    #[error("Command frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Identity announced in every heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub protocol_version: u32,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Outcome of a session that closed without a transport failure
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Commands dispatched, in order
    pub commands: Vec<Command>,
    /// Telemetry frames delivered and cleared from the queue
    pub frames_drained: usize,
    /// Protocol error that ended (or was skipped during) the session
    pub protocol_error: Option<FrameError>,
    pub final_state: SessionState,
}

async fn with_timeout<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, SessionError> {
    match time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(SessionError::Io { operation, source }),
        Err(_) => Err(SessionError::Timeout(operation)),
    }
}

/// One telemetry session.
///
/// Borrows the stores for the duration of the exchange and owns a working
/// copy of the config record, which `$WCF` updates in place once persisted.
pub struct TelemetrySession<'a, Q, C, L> {
    identity: &'a DeviceIdentity,
    queue: &'a FrameQueue<Q>,
    config: &'a ConfigStore<C>,
    logs: &'a LogArchive<L>,
    record: ConfigRecord,
    state: SessionState,
    commands: Vec<Command>,
    frames_drained: usize,
    protocol_error: Option<FrameError>,
}

impl<'a, Q, C, L> TelemetrySession<'a, Q, C, L>
where
    Q: ByteStore,
    C: ByteStore,
    L: ByteStore,
{
    pub fn new(
        identity: &'a DeviceIdentity,
        queue: &'a FrameQueue<Q>,
        config: &'a ConfigStore<C>,
        logs: &'a LogArchive<L>,
        record: ConfigRecord,
    ) -> Self {
        Self {
            identity,
            queue,
            config,
            logs,
            record,
            state: SessionState::Idle,
            commands: Vec::new(),
            frames_drained: 0,
            protocol_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current config record, including any update applied by the server
    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// Any connect, send or receive failure or timeout. The session is
    /// `Closed` afterwards either way.
    pub async fn run(&mut self, connector: &dyn Connector) -> Result<SessionReport, SessionError> {
        let endpoint = self.record.endpoint();
        let limit = endpoint.timeout;

        self.state = SessionState::Connecting;
        let connected = match time::timeout(limit, connector.connect(&endpoint)).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(source)) => Err(SessionError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }),
            Err(_) => Err(SessionError::Timeout("connect")),
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                self.state = SessionState::Closed;
                error!("Session failed: {}", e);
                return Err(e);
            }
        };

        let result = self.converse(transport.as_mut(), limit).await;

        if let Err(e) = with_timeout("close", limit, transport.close()).await {
            debug!("Closing transport failed: {}", e);
        }
        self.state = SessionState::Closed;

        match result {
            Ok(()) => {
                info!(
                    commands = self.commands.len(),
                    drained = self.frames_drained,
                    "Session closed"
                );
                Ok(SessionReport {
                    commands: self.commands.clone(),
                    frames_drained: self.frames_drained,
                    protocol_error: self.protocol_error.clone(),
                    final_state: self.state,
                })
            }
            Err(e) => {
                error!("Session failed: {}", e);
                Err(e)
            }
        }
    }

    async fn converse(&mut self, transport: &mut dyn Transport, limit: Duration) -> Result<(), SessionError> {
        let mut accumulator = FrameAccumulator::new(MAX_COMMAND_FRAME_SIZE);

        self.send_heartbeat(transport, limit).await?;

        loop {
            self.state = SessionState::AwaitingCommand;
            let frame = self.recv_command(transport, &mut accumulator, limit).await?;

            self.state = SessionState::Dispatching;
            let command = match decode_frame(&frame) {
                Ok((command, _)) => command,
                Err(e) => {
                    let keep_alive = matches!(e, FrameError::MalformedFrame { keep_alive: true, .. });
                    warn!("Ignoring bad command frame: {}", e);
                    self.protocol_error = Some(e);
                    if keep_alive {
                        self.send_heartbeat(transport, limit).await?;
                        continue;
                    }
                    return Ok(());
                }
            };

            debug!("Dispatching {}", command.name());
            self.dispatch(&command, transport, limit).await?;
            let keep_alive = command.keep_alive;
            self.commands.push(command);

            if !keep_alive {
                return Ok(());
            }
            self.send_heartbeat(transport, limit).await?;
        }
    }

    async fn send_heartbeat(&mut self, transport: &mut dyn Transport, limit: Duration) -> Result<(), SessionError> {
        let pending = self.queue.len();
        let frame = encode_heartbeat(pending, &self.identity.device_id, self.identity.protocol_version);
        with_timeout("heartbeat", limit, transport.send(&frame)).await?;
        debug!(pending, "Sent heartbeat");
        self.state = SessionState::HeartbeatSent;
        Ok(())
    }

    async fn recv_command(
        &self,
        transport: &mut dyn Transport,
        accumulator: &mut FrameAccumulator,
        limit: Duration,
    ) -> Result<Bytes, SessionError> {
        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        loop {
            match accumulator.take_frame(FrameMode::Line) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(_) => {
                    return Err(SessionError::FrameTooLarge {
                        size: accumulator.len(),
                        max: MAX_COMMAND_FRAME_SIZE,
                    })
                }
            }

            let n = with_timeout("receive", limit, transport.recv(&mut chunk)).await?;
            if n == 0 {
                return Err(SessionError::Disconnected);
            }
            accumulator.push(&chunk[..n]);
        }
    }

    async fn dispatch(
        &mut self,
        command: &Command,
        transport: &mut dyn Transport,
        limit: Duration,
    ) -> Result<(), SessionError> {
        match &command.kind {
            CommandKind::DrainQueue => self.drain_queue(transport, limit).await,
            CommandKind::ReadConfig => {
                let reply = encode_config(&self.record);
                with_timeout("config reply", limit, transport.send(&reply)).await
            }
            CommandKind::WriteConfig(tokens) => {
                self.apply_config_update(tokens);
                let reply = encode_config(&self.record);
                with_timeout("config reply", limit, transport.send(&reply)).await
            }
            CommandKind::FetchLog => {
                let contents = self.logs.read_all();
                info!(bytes = contents.len(), "Sending device log");
                let reply = encode_log(contents.len(), &contents);
                with_timeout("log reply", limit, transport.send(&reply)).await
            }
        }
    }

    /// Send every queued frame, then EOT. The queue is cleared only once the
    /// EOT has been sent.
    async fn drain_queue(&mut self, transport: &mut dyn Transport, limit: Duration) -> Result<(), SessionError> {
        let frames = self.queue.read_all();
        info!(frames = frames.len(), "Draining telemetry queue");

        for frame in &frames {
            with_timeout("drain", limit, transport.send(frame)).await?;
        }
        with_timeout("drain", limit, transport.send(&[EOT])).await?;

        if let Err(e) = self.queue.clear() {
            // Frames stay queued and will be delivered again next cycle
            error!("Failed to clear telemetry queue after drain: {}", e);
            return Ok(());
        }
        self.frames_drained += frames.len();
        Ok(())
    }

    /// Merge and persist a config update. On any failure the current record
    /// is kept.
    fn apply_config_update(&mut self, tokens: &[String]) {
        let merged = match self.record.merged(tokens) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Rejected config update: {}", e);
                return;
            }
        };

        match self.config.save(&merged) {
            Ok(()) => {
                info!("Config record updated");
                self.record = merged;
            }
            Err(e) => error!("Failed to persist config update, keeping previous record: {}", e),
        }
    }
}
