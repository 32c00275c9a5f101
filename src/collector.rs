//! # Collector
//!
//! Server half of the telemetry protocol.
//!
//! Drives a device session from the other end of the connection: waits for
//! heartbeats, issues commands and parses the replies. Used by the test
//! server and by end-to-end tests of the device session.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::debug;

use crate::error::Result;
use crate::session::SessionError;
use crate::store::ConfigRecord;
use crate::telemetry::TelemetryFrame;
use crate::wire::decoder::{decode_config, decode_heartbeat, decode_log_body, decode_log_header, FrameAccumulator};
use crate::wire::encoder::encode_command;
use crate::wire::protocol::{CRLF, EOT};
use crate::wire::{Command, CommandKind, FrameMode, HeartbeatFrame};

/// Largest reply the collector buffers (a full queue drain)
pub const MAX_REPLY_SIZE: usize = 1024 * 1024;

const READ_CHUNK_SIZE: usize = 1024;

/// Server-side protocol peer over an async stream
pub struct Collector<T> {
    stream: T,
    accumulator: FrameAccumulator,
    timeout: Duration,
}

impl<T> Collector<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, timeout: Duration) -> Self {
        Self {
            stream,
            accumulator: FrameAccumulator::new(MAX_REPLY_SIZE),
            timeout,
        }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    async fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = time::timeout(self.timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| SessionError::Timeout("collector receive"))??;
        if n == 0 {
            return Err(SessionError::Disconnected.into());
        }
        self.accumulator.push(&chunk[..n]);
        Ok(())
    }

    async fn read_frame(&mut self, mode: FrameMode) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.accumulator.take_frame(mode)? {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    async fn read_exact(&mut self, count: usize) -> Result<Bytes> {
        loop {
            if let Some(bytes) = self.accumulator.take_exact(count) {
                return Ok(bytes);
            }
            self.fill().await?;
        }
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        debug!("Sending {}", command.name());
        let frame = encode_command(&command);
        time::timeout(self.timeout, async {
            self.stream.write_all(&frame).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| SessionError::Timeout("collector send"))??;
        Ok(())
    }

    /// Wait for the next heartbeat
    pub async fn read_heartbeat(&mut self) -> Result<HeartbeatFrame> {
        let frame = self.read_frame(FrameMode::Line).await?;
        Ok(decode_heartbeat(&frame)?)
    }

    /// Request every queued frame.
    ///
    /// Reads in binary-drain mode until EOT and parses each telemetry frame.
    pub async fn request_drain(&mut self, keep_alive: bool) -> Result<Vec<TelemetryFrame>> {
        self.send(Command::new(CommandKind::DrainQueue, keep_alive)).await?;
        let drained = self.read_frame(FrameMode::BinaryDrain).await?;
        let body = drained.strip_suffix(&[EOT]).unwrap_or(&drained[..]);

        let mut frames = Vec::new();
        let mut rest = body;
        while let Some(pos) = rest.windows(CRLF.len()).position(|w| w == CRLF) {
            let (line, tail) = rest.split_at(pos + CRLF.len());
            frames.push(TelemetryFrame::decode(line)?);
            rest = tail;
        }
        debug!(frames = frames.len(), "Drained device queue");
        Ok(frames)
    }

    /// Read the device config record
    pub async fn read_config(&mut self, keep_alive: bool) -> Result<ConfigRecord> {
        self.send(Command::new(CommandKind::ReadConfig, keep_alive)).await?;
        self.read_config_reply().await
    }

    /// Send positional config tokens and return the record the device reports
    /// back (unchanged if the device rejected the update).
    pub async fn write_config(&mut self, keep_alive: bool, tokens: Vec<String>) -> Result<ConfigRecord> {
        self.send(Command::new(CommandKind::WriteConfig(tokens), keep_alive)).await?;
        self.read_config_reply().await
    }

    async fn read_config_reply(&mut self) -> Result<ConfigRecord> {
        let frame = self.read_frame(FrameMode::Line).await?;
        let tokens = decode_config(&frame)?;
        Ok(ConfigRecord::default().merged(&tokens)?)
    }

    /// Fetch the device log
    pub async fn fetch_log(&mut self, keep_alive: bool) -> Result<Vec<u8>> {
        self.send(Command::new(CommandKind::FetchLog, keep_alive)).await?;
        let header = self.read_frame(FrameMode::Line).await?;
        let size = decode_log_header(&header)?;
        // STX + contents + ETX
        let body = self.read_exact(size + 2).await?;
        Ok(decode_log_body(&body)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::link::port_trait::mocks::ScriptedConnector;
    use crate::link::{StreamTransport, TcpConnector};
    use crate::logging::{LogArchive, LOG_ENTRY, OLD_LOG_ENTRY};
    use crate::session::{DeviceIdentity, SessionState, TelemetrySession};
    use crate::store::{ByteStore, ConfigStore, FrameQueue, MemoryByteStore};
    use crate::wire::FrameError;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Device {
        identity: DeviceIdentity,
        store: MemoryByteStore,
        queue: FrameQueue<MemoryByteStore>,
        config: ConfigStore<MemoryByteStore>,
        logs: LogArchive<MemoryByteStore>,
    }

    impl Device {
        fn new() -> Self {
            let store = MemoryByteStore::new();
            Self {
                identity: DeviceIdentity::new("240AC4A1B2C3"),
                queue: FrameQueue::new(store.clone()),
                config: ConfigStore::new(store.clone()),
                logs: LogArchive::new(store.clone()),
                store,
            }
        }

        fn queue_frame(&self, latitude: f64) -> TelemetryFrame {
            let frame = TelemetryFrame {
                latitude: Some(latitude),
                ..Default::default()
            };
            self.queue.append(&frame.encode()).unwrap();
            frame
        }
    }

    #[tokio::test]
    async fn test_full_exchange_over_duplex() {
        let device = Device::new();
        let first = device.queue_frame(1.5);
        let second = device.queue_frame(-2.25);
        device.store.write(LOG_ENTRY, b"recent\n").unwrap();
        device.store.write(OLD_LOG_ENTRY, b"older\n").unwrap();

        let (device_end, server_end) = tokio::io::duplex(4096);
        let connector = ScriptedConnector::new(StreamTransport::new(device_end));
        let mut session = TelemetrySession::new(
            &device.identity,
            &device.queue,
            &device.config,
            &device.logs,
            ConfigRecord::default(),
        );

        let server = async {
            let mut collector = Collector::new(server_end, TIMEOUT);
            let hb = collector.read_heartbeat().await.unwrap();
            assert_eq!(hb.pending_count, 2);
            assert_eq!(hb.device_id, "240AC4A1B2C3");

            let record = collector.read_config(true).await.unwrap();
            assert_eq!(record, ConfigRecord::default());
            assert_eq!(collector.read_heartbeat().await.unwrap().pending_count, 2);

            let frames = collector.request_drain(true).await.unwrap();
            assert_eq!(collector.read_heartbeat().await.unwrap().pending_count, 0);

            let update = vec!["".to_string(), "".to_string(), "60".to_string()];
            let updated = collector.write_config(true, update).await.unwrap();
            assert_eq!(updated.sleep_seconds, 60);
            collector.read_heartbeat().await.unwrap();

            let log = collector.fetch_log(false).await.unwrap();
            (frames, log)
        };

        let (report, (frames, log)) = tokio::join!(session.run(&connector), server);

        assert_eq!(frames, vec![first, second]);
        assert_eq!(log, b"recent\nolder\n");

        let report = report.unwrap();
        assert_eq!(report.commands.len(), 4);
        assert_eq!(report.frames_drained, 2);
        assert_eq!(report.final_state, SessionState::Closed);
        assert!(device.queue.is_empty());
        assert_eq!(device.config.load(&ConfigRecord::default()).sleep_seconds, 60);
    }

    #[tokio::test]
    async fn test_rejected_update_reports_unchanged_record() {
        let device = Device::new();
        let (device_end, server_end) = tokio::io::duplex(1024);
        let connector = ScriptedConnector::new(StreamTransport::new(device_end));
        let mut session = TelemetrySession::new(
            &device.identity,
            &device.queue,
            &device.config,
            &device.logs,
            ConfigRecord::default(),
        );

        let server = async {
            let mut collector = Collector::new(server_end, TIMEOUT);
            collector.read_heartbeat().await.unwrap();
            collector
                .write_config(false, vec!["9".to_string()])
                .await
                .unwrap()
        };

        let (report, record) = tokio::join!(session.run(&connector), server);
        assert!(report.is_ok());
        assert_eq!(record, ConfigRecord::default());
    }

    #[tokio::test]
    async fn test_empty_drain() {
        let device = Device::new();
        let (device_end, server_end) = tokio::io::duplex(1024);
        let connector = ScriptedConnector::new(StreamTransport::new(device_end));
        let mut session = TelemetrySession::new(
            &device.identity,
            &device.queue,
            &device.config,
            &device.logs,
            ConfigRecord::default(),
        );

        let server = async {
            let mut collector = Collector::new(server_end, TIMEOUT);
            collector.read_heartbeat().await.unwrap();
            collector.request_drain(false).await.unwrap()
        };

        let (report, frames) = tokio::join!(session.run(&connector), server);
        assert!(frames.is_empty());
        assert_eq!(report.unwrap().frames_drained, 0);
    }

    #[tokio::test]
    async fn test_exchange_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let device = Device::new();
        let frame = device.queue_frame(48.8566);
        let record = ConfigRecord {
            server_address: "127.0.0.1".to_string(),
            server_port: port,
            ..Default::default()
        };
        let mut session = TelemetrySession::new(
            &device.identity,
            &device.queue,
            &device.config,
            &device.logs,
            record,
        );

        let server = async {
            let (socket, _) = listener.accept().await.unwrap();
            let mut collector = Collector::new(socket, TIMEOUT);
            assert_eq!(collector.read_heartbeat().await.unwrap().pending_count, 1);
            collector.request_drain(false).await.unwrap()
        };

        let (report, frames) = tokio::join!(session.run(&TcpConnector), server);
        assert_eq!(report.unwrap().frames_drained, 1);
        assert_eq!(frames, vec![frame]);
    }

    #[tokio::test]
    async fn test_unexpected_reply_tag() {
        let (mut device_end, server_end) = tokio::io::duplex(256);
        device_end.write_all(b"@CFG,1\r\n").await.unwrap();

        let mut collector = Collector::new(server_end, TIMEOUT);
        let err = collector.read_heartbeat().await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Frame(FrameError::UnexpectedTag { expected: "+HRT", .. })
        ));
    }

    #[tokio::test]
    async fn test_device_hangup() {
        let (device_end, server_end) = tokio::io::duplex(256);
        drop(device_end);

        let mut collector = Collector::new(server_end, TIMEOUT);
        let err = collector.read_heartbeat().await.unwrap_err();
        assert!(matches!(err, TrackerError::Session(SessionError::Disconnected)));
    }
}
