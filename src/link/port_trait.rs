//! Trait abstraction for the server connection to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Endpoint;

/// Byte stream to the telemetry server
#[async_trait]
pub trait Transport: Send {
    /// Write all data and flush it
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes into `buf`. `Ok(0)` means the peer closed.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down the write side
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>>;
}

/// Wrapper around any tokio stream that implements Transport
pub struct StreamTransport<T> {
    stream: T,
}

impl<T> StreamTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

#[async_trait]
impl<T> Transport for StreamTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
