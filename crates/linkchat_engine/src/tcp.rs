//! Socket binding — TCP on the local network.
//!
//! Many concurrent connections; the default service port is 8888 but the
//! engine always takes it from configuration.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::EngineError;
use crate::transport::{Channel, Listener, Transport};

/// The local-network socket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, bind: SocketAddr) -> Result<Box<dyn Listener>, EngineError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| EngineError::Bind { addr: bind, source })?;
        debug!("tcp listener bound on {}", listener.local_addr()?);
        Ok(Box::new(TcpChannelListener { inner: listener }))
    }

    async fn connect(
        &self,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<Channel, EngineError> {
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Err(_) => Err(EngineError::Timeout(timeout)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(EngineError::Refused(target.to_string()))
            }
            Ok(Err(e)) => Err(EngineError::Io(e)),
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(Channel::from_stream(stream))
            }
        }
    }
}

struct TcpChannelListener {
    inner: TcpListener,
}

#[async_trait]
impl Listener for TcpChannelListener {
    async fn accept(&mut self) -> Result<(Channel, SocketAddr), EngineError> {
        let (stream, addr) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok((Channel::from_stream(stream), addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
