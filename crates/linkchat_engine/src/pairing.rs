//! Pairing binding — an in-process rendezvous medium.
//!
//! Stands in for a short-range pairing transport (the kind that pairs two
//! devices and carries a single session at a time): `listen` registers an
//! endpoint with the medium, `connect` rendezvouses with it over an
//! in-memory duplex pipe. One live session at a time is the medium's
//! capability (`single_session`), which the engine enforces as a registry
//! capacity of one. Also serves as the deterministic medium for engine
//! tests.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::transport::{Channel, Listener, Transport};

const PIPE_CAPACITY: usize = 16 * 1024;

struct Medium {
    listeners: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<(Channel, SocketAddr)>>>,
    next_host: AtomicU16,
}

/// An in-process pairing transport. Clones share the same medium, so one
/// instance's listener is reachable from another's `connect`.
#[derive(Clone)]
pub struct PairingTransport {
    medium: Arc<Medium>,
}

impl PairingTransport {
    pub fn new() -> Self {
        Self {
            medium: Arc::new(Medium {
                listeners: Mutex::new(HashMap::new()),
                next_host: AtomicU16::new(2),
            }),
        }
    }

    // Each connect is assigned a distinct synthetic source address on the
    // medium, the way a pairing medium hands out device identities.
    fn next_source(&self, port: u16) -> SocketAddr {
        let n = self.medium.next_host.fetch_add(1, Ordering::Relaxed);
        let [hi, lo] = n.to_be_bytes();
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 83, hi, lo)), port)
    }
}

impl Default for PairingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for PairingTransport {
    async fn listen(&self, bind: SocketAddr) -> Result<Box<dyn Listener>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut listeners = self.medium.listeners.lock().expect("medium lock");
            if listeners.contains_key(&bind) {
                return Err(EngineError::Bind {
                    addr: bind,
                    source: io::Error::new(io::ErrorKind::AddrInUse, "endpoint already bound"),
                });
            }
            listeners.insert(bind, tx);
        }
        Ok(Box::new(PairingListener {
            addr: bind,
            rx,
            medium: Arc::clone(&self.medium),
        }))
    }

    async fn connect(
        &self,
        target: SocketAddr,
        _timeout: Duration,
    ) -> Result<Channel, EngineError> {
        let tx = {
            let listeners = self.medium.listeners.lock().expect("medium lock");
            listeners.get(&target).cloned()
        };
        let Some(tx) = tx else {
            return Err(EngineError::Refused(target.to_string()));
        };

        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        let source = self.next_source(target.port());
        tx.send((Channel::from_stream(theirs), source))
            .map_err(|_| EngineError::Refused(target.to_string()))?;
        Ok(Channel::from_stream(ours))
    }

    fn single_session(&self) -> bool {
        true
    }
}

struct PairingListener {
    addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<(Channel, SocketAddr)>,
    medium: Arc<Medium>,
}

#[async_trait]
impl Listener for PairingListener {
    async fn accept(&mut self) -> Result<(Channel, SocketAddr), EngineError> {
        self.rx.recv().await.ok_or_else(|| {
            EngineError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pairing listener closed",
            ))
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for PairingListener {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.medium.listeners.lock() {
            listeners.remove(&self.addr);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelReader, ChannelWriter};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_rendezvous_roundtrip() {
        let transport = PairingTransport::new();
        let mut listener = transport.listen(addr("10.83.0.1:8888")).await.unwrap();

        let channel = transport
            .connect(addr("10.83.0.1:8888"), Duration::from_secs(1))
            .await
            .unwrap();
        let (mut our_reader, mut our_writer) = channel.split();

        let (their_channel, source) = listener.accept().await.unwrap();
        assert_eq!(source.port(), 8888);

        let (mut their_reader, mut their_writer) = their_channel.split();

        our_writer.write_all(b"hello\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = their_reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");

        their_writer.write_all(b"hi\n").await.unwrap();
        let n = our_reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi\n");
    }

    #[tokio::test]
    async fn test_connect_without_listener_is_refused() {
        let transport = PairingTransport::new();
        let result = transport
            .connect(addr("10.83.0.1:8888"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(EngineError::Refused(_))));
    }

    #[tokio::test]
    async fn test_double_bind_rejected() {
        let transport = PairingTransport::new();
        let _listener = transport.listen(addr("10.83.0.1:8888")).await.unwrap();
        let result = transport.listen(addr("10.83.0.1:8888")).await;
        assert!(matches!(result, Err(EngineError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_listener_drop_unbinds() {
        let transport = PairingTransport::new();
        let listener = transport.listen(addr("10.83.0.1:8888")).await.unwrap();
        drop(listener);

        // Address is free again.
        let _listener = transport.listen(addr("10.83.0.1:8888")).await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_source_addresses() {
        let transport = PairingTransport::new();
        let mut listener = transport.listen(addr("10.83.0.1:8888")).await.unwrap();

        let _a = transport
            .connect(addr("10.83.0.1:8888"), Duration::from_secs(1))
            .await
            .unwrap();
        let _b = transport
            .connect(addr("10.83.0.1:8888"), Duration::from_secs(1))
            .await
            .unwrap();

        let (_, src_a) = listener.accept().await.unwrap();
        let (_, src_b) = listener.accept().await.unwrap();
        assert_ne!(src_a, src_b);
    }

    #[test]
    fn test_single_session_capability() {
        assert!(PairingTransport::new().single_session());
        assert!(!crate::tcp::TcpTransport.single_session());
    }
}
