//! Transport abstraction — the seam between the engine and the medium.
//!
//! A [`Transport`] knows how to open a [`Listener`] and how to dial a
//! remote endpoint; both sides of the contract hand back a [`Channel`],
//! a bidirectional byte stream that splits into independent read and
//! write halves so receiving and sending can run on different tasks.
//! Two bindings ship with the engine: [`TcpTransport`](crate::tcp) for
//! the local-network socket medium and
//! [`PairingTransport`](crate::pairing) for a one-session-at-a-time
//! pairing medium. The abstraction itself holds no shared state; side
//! effects are confined to the underlying medium.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EngineError;

/// The read half of a channel.
#[async_trait]
pub trait ChannelReader: Send {
    /// Read a chunk of bytes. `Ok(0)` signals end-of-stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The write half of a channel. The broadcast router is the sole writer;
/// concurrent writers to one channel are not supported.
#[async_trait]
pub trait ChannelWriter: Send {
    /// Write the whole buffer, failing once the peer has closed.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Close the outbound direction. Treated as idempotent by the engine:
    /// errors from an already-closed channel are ignored at call sites.
    async fn shutdown(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T> ChannelReader for T
where
    T: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T> ChannelWriter for T
where
    T: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(self, buf).await?;
        AsyncWriteExt::flush(self).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// A bidirectional byte stream to a connected peer.
pub struct Channel {
    pub reader: Box<dyn ChannelReader>,
    pub writer: Box<dyn ChannelWriter>,
}

impl Channel {
    /// Wrap any async stream into a channel by splitting it.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        (self.reader, self.writer)
    }
}

/// An open listener accepting inbound channels.
#[async_trait]
pub trait Listener: Send {
    /// Block until a peer connects. Fails when the listener is closed.
    async fn accept(&mut self) -> Result<(Channel, SocketAddr), EngineError>;

    /// The address the listener is actually bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A connection medium.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a listener on `bind`. Fails with [`EngineError::Bind`] if the
    /// address is unavailable.
    async fn listen(&self, bind: SocketAddr) -> Result<Box<dyn Listener>, EngineError>;

    /// Dial `target`, giving up after `timeout`.
    async fn connect(
        &self,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<Channel, EngineError>;

    /// Whether the medium supports only one live session at a time
    /// (pairing-style transports). The engine enforces this as a registry
    /// capacity of one, rejecting further connects with
    /// [`EngineError::AlreadyConnected`].
    fn single_session(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
