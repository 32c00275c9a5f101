//! # Server Link Module
//!
//! Connection to the telemetry server.
//!
//! This module handles:
//! - Describing the server endpoint derived from the config record
//! - Opening plain TCP connections
//! - The transport/connector seam the session is written against
//!
//! Timeouts are applied by the caller around every operation.

pub mod port_trait;

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub use port_trait::{Connector, StreamTransport, Transport};

/// Server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    /// Per-operation timeout
    pub timeout: Duration,
    /// Server expects a TLS-wrapped stream
    pub use_tls: bool,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Plain TCP connector.
///
/// TLS wrapping is not provided here; a connector that wraps the stream must
/// be supplied for endpoints with `use_tls` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>> {
        if endpoint.use_tls {
            warn!("TLS requested for {} but the TCP connector cannot wrap streams", endpoint);
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TLS transport wrapping not configured",
            ));
        }

        debug!("Connecting to {}", endpoint);
        let stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", endpoint);
        Ok(Box::new(StreamTransport::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn endpoint(port: u16, use_tls: bool) -> Endpoint {
        Endpoint {
            address: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_secs(1),
            use_tls,
        }
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(endpoint(8883, false).to_string(), "127.0.0.1:8883");
    }

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"$TEL\r\n").await.unwrap();
            buf
        });

        let mut transport = TcpConnector.connect(&endpoint(port, false)).await.unwrap();
        transport.send(b"+HRT,0").await.unwrap();
        let mut buf = [0u8; 16];
        let mut received = Vec::new();
        while received.len() < 6 {
            let n = transport.recv(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"$TEL\r\n");
        transport.close().await.unwrap();

        assert_eq!(&server.await.unwrap(), b"+HRT,0");
    }

    #[tokio::test]
    async fn test_tcp_connector_refuses_tls() {
        let err = TcpConnector.connect(&endpoint(1, true)).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_stream_transport_over_duplex() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        transport.send(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 8];
        let n = transport.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
