//! ChatEngine — top-level coordinator for peer connections and messaging.
//!
//! [`ChatEngine`] is the primary public API. It manages:
//! - the accept loop (inbound connections)
//! - outbound connections (dial a discovered peer)
//! - one listener loop per connected channel (decode inbound frames)
//! - broadcast fan-out of locally authored messages
//! - discovery scans
//!
//! Every accept loop, listener loop, and discovery probe runs as its own
//! tokio task; all per-peer state lives behind one mutex-guarded
//! [`PeerRegistry`]. There is no automatic retry or reconnection: callers
//! observing a failure re-invoke [`connect_to`](ChatEngine::connect_to) or
//! [`start_accepting`](ChatEngine::start_accepting) themselves.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::codec::{FrameDecoder, encode_frame};
use crate::config::EngineConfig;
use crate::discovery;
use crate::error::EngineError;
use crate::event::{EngineEvent, EventBus};
use crate::peer::{
    ChatMessage, ConnectionEntry, ConnectionState, Peer, PeerId, PeerRegistry, Role, WriterHandle,
};
use crate::transport::{Channel, ChannelReader, ChannelWriter, Listener, Transport};

const READ_BUFFER_SIZE: usize = 4096;

/// Result of a broadcast [`send`](ChatEngine::send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// No peers were connected; nothing was sent. Informational — the UI
    /// can react, but nothing failed.
    NoPeers,
    /// Fan-out completed. `delivered` writes succeeded; `failed` peers
    /// were torn down after the full pass.
    Sent {
        delivered: usize,
        failed: Vec<PeerId>,
    },
}

/// The peer connection and messaging engine.
///
/// Create one per application instance over the transport binding of
/// choice. All operations are safe to call from any thread; observers
/// receive events on their own subscription
/// (see [`subscribe`](ChatEngine::subscribe)).
pub struct ChatEngine<T: Transport> {
    transport: Arc<T>,
    config: EngineConfig,
    registry: Arc<Mutex<PeerRegistry>>,
    events: EventBus,
    shutdown_tx: broadcast::Sender<()>,
    acceptor_state: Arc<StdMutex<ConnectionState>>,
    running: AtomicBool,
}

impl<T: Transport> ChatEngine<T> {
    /// Create a new engine. A single-session transport caps the registry
    /// at one connection.
    pub fn new(transport: T, config: EngineConfig) -> Self {
        let capacity = transport.single_session().then_some(1);
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            transport: Arc::new(transport),
            config,
            registry: Arc::new(Mutex::new(PeerRegistry::new(capacity))),
            events: EventBus::new(256),
            shutdown_tx,
            acceptor_state: Arc::new(StdMutex::new(ConnectionState::Idle)),
            running: AtomicBool::new(true),
        }
    }

    /// Subscribe to engine events. Each subscriber gets an independent
    /// receiver and drains it on its own task.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether `shutdown` has not yet been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Lifecycle state of the acceptor role (independent of any
    /// individual peer connections).
    pub fn acceptor_state(&self) -> ConnectionState {
        *self.acceptor_state.lock().expect("acceptor state lock")
    }

    /// Snapshot of currently connected peers, in registry order.
    pub async fn connected_peers(&self) -> Vec<Peer> {
        self.registry.lock().await.snapshot()
    }

    /// Whether at least one peer is connected.
    pub async fn is_connected(&self) -> bool {
        self.registry.lock().await.connected_count() > 0
    }

    /// Bind a listener on the configured address and start the accept
    /// loop on a dedicated task. Returns the bound address.
    ///
    /// A single failed accept is logged and the loop continues; only
    /// listener closure (or `shutdown`) ends it. A bind failure is fatal
    /// to this attempt and leaves the acceptor role `Closed`. Calling
    /// this while the accept loop is already running is rejected and
    /// leaves the running loop untouched.
    pub async fn start_accepting(&self) -> Result<SocketAddr, EngineError> {
        self.ensure_running()?;
        {
            let state = self.acceptor_state.lock().expect("acceptor state lock");
            if *state == ConnectionState::Listening {
                return Err(EngineError::AlreadyListening);
            }
        }
        let bind = self.config.listen_addr;
        let listener = match self.transport.listen(bind).await {
            Ok(listener) => listener,
            Err(e) => {
                let mut state = self.acceptor_state.lock().expect("acceptor state lock");
                if *state != ConnectionState::Listening {
                    *state = ConnectionState::Closed;
                }
                error!("failed to bind acceptor on {bind}: {e}");
                return Err(e);
            }
        };
        let local = listener.local_addr()?;
        *self.acceptor_state.lock().expect("acceptor state lock") = ConnectionState::Listening;
        info!("accepting connections on {local}");

        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let state = Arc::clone(&self.acceptor_state);
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            accept_loop(listener, registry, events, shutdown).await;
            *state.lock().expect("acceptor state lock") = ConnectionState::Closed;
        });
        Ok(local)
    }

    /// Dial a peer and, on success, register the connection and start its
    /// listener loop. Rejects a peer that is already connected — and any
    /// second connection on a single-session transport — with
    /// [`EngineError::AlreadyConnected`].
    pub async fn connect_to(&self, peer: &Peer) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.registry.lock().await.check_admission(&peer.id)?;
        let target = self.resolve_peer_addr(peer)?;

        info!("connecting to {} at {target}", peer.id);
        match self
            .transport
            .connect(target, self.config.connect_timeout)
            .await
        {
            Ok(channel) => {
                let peer = Peer {
                    online: true,
                    ..peer.clone()
                };
                register_connection(channel, peer, Role::Initiator, &self.registry, &self.events)
                    .await
            }
            Err(e) => {
                warn!("connection to {} failed: {e}", peer.id);
                self.events.publish(EngineEvent::ConnectionFailed {
                    peer: peer.id.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Launch a discovery scan from `local_ip` (the caller resolves the
    /// local address; the engine does not enumerate platform interfaces).
    /// Returns immediately; results arrive as events.
    pub fn discover_devices(&self, local_ip: IpAddr) -> Result<(), EngineError> {
        self.ensure_running()?;
        discovery::start_scan(
            Arc::clone(&self.transport),
            self.config.discovery.clone(),
            local_ip,
            self.events.clone(),
            self.shutdown_tx.subscribe(),
        );
        Ok(())
    }

    /// Broadcast a message to every connected peer, in registry order.
    ///
    /// A write failure on one peer never aborts delivery to the others;
    /// failing peers are torn down only after the full pass. An empty
    /// registry is a no-op reported as [`SendOutcome::NoPeers`].
    pub async fn send(&self, text: &str) -> Result<SendOutcome, EngineError> {
        self.ensure_running()?;
        let frame = encode_frame(text)?;

        // Snapshot the writer handles under the lock, write outside it:
        // a peer that has stopped reading stalls only its own write, and
        // teardown paths stay free to close it out from under us.
        let handles = {
            let registry = self.registry.lock().await;
            if registry.connected_count() == 0 {
                debug!("send with no peers connected");
                return Ok(SendOutcome::NoPeers);
            }
            registry.writer_handles()
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for handle in &handles {
            match write_frame(handle, &frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("write to {} failed: {e}", handle.peer_id);
                    failed.push(handle.peer_id.clone());
                }
            }
        }

        for id in &failed {
            close_peer(id, &self.registry, &self.events, true).await;
        }
        debug!("message delivered to {delivered} peer(s)");
        Ok(SendOutcome::Sent { delivered, failed })
    }

    /// Explicitly close one peer's connection. Returns whether the peer
    /// was connected (`false` means some other path already closed it).
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        close_peer(peer_id, &self.registry, &self.events, true).await
    }

    /// Stop the engine: close every listener and channel so blocked reads
    /// fail fast and all spawned tasks observe termination. All tasks
    /// have been told to stop when this returns; their teardown may
    /// finish asynchronously. Idempotent.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");
        let _ = self.shutdown_tx.send(());

        let entries = self.registry.lock().await.drain();
        for mut entry in entries {
            // A fan-out write blocked on this peer releases the writer
            // once `closed` fires.
            entry.closed.notify_one();
            if let Some(task) = entry.reader_task.take() {
                task.abort();
            }
            let mut writer = entry.writer.lock().await;
            let _ = writer.shutdown().await;
            drop(writer);
            self.events
                .publish(EngineEvent::PeerDisconnected(entry.peer.id.clone()));
        }
        self.events
            .publish(EngineEvent::ConnectionStatusChanged { connected: false });
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    // A peer id carrying a port is used as-is; a bare host address gets
    // the configured probe/service port.
    fn resolve_peer_addr(&self, peer: &Peer) -> Result<SocketAddr, EngineError> {
        if let Ok(addr) = peer.id.as_str().parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = peer.id.as_str().parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.config.discovery.probe_port));
        }
        Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("peer id {:?} is not an address", peer.id.as_str()),
        )))
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn accept_loop(
    mut listener: Box<dyn Listener>,
    registry: Arc<Mutex<PeerRegistry>>,
    events: EventBus,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((channel, remote)) => {
                    let peer = Peer::discovered(remote.ip().to_string());
                    if let Err(e) =
                        register_connection(channel, peer, Role::Acceptor, &registry, &events).await
                    {
                        // Duplicate or over-capacity inbound connection:
                        // the new channel is dropped, the existing one
                        // stays untouched.
                        warn!("rejected inbound connection from {remote}: {e}");
                    }
                }
                Err(e) if transient_accept_error(&e) => {
                    warn!("accept failed, continuing: {e}");
                }
                Err(e) => {
                    error!("acceptor closed: {e}");
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("acceptor shutting down");
                break;
            }
        }
    }
}

fn transient_accept_error(e: &EngineError) -> bool {
    matches!(e, EngineError::Io(io) if matches!(
        io.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    ))
}

/// Insert the connection into the registry and start its listener loop.
/// On rejection the channel is dropped, which closes it.
async fn register_connection(
    channel: Channel,
    peer: Peer,
    role: Role,
    registry: &Arc<Mutex<PeerRegistry>>,
    events: &EventBus,
) -> Result<(), EngineError> {
    let (reader, writer) = channel.split();
    let peer_id = peer.id.clone();
    {
        let mut reg = registry.lock().await;
        reg.insert_if_absent(ConnectionEntry::new(peer, role, writer))?;
    }
    info!("peer {peer_id} connected ({role:?})");
    events.publish(EngineEvent::PeerConnected(peer_id.clone()));
    events.publish(EngineEvent::ConnectionStatusChanged { connected: true });

    let loop_registry = Arc::clone(registry);
    let loop_events = events.clone();
    let loop_id = peer_id.clone();
    let handle =
        tokio::spawn(async move { listener_loop(reader, loop_id, loop_registry, loop_events).await });
    registry.lock().await.attach_reader_task(&peer_id, handle);
    Ok(())
}

/// Write one frame through a peer's handle. The registry lock is not
/// held here; a teardown racing the write fires `closed`, which cancels
/// a write blocked on a peer that has stopped reading.
async fn write_frame(handle: &WriterHandle, frame: &[u8]) -> std::io::Result<()> {
    let mut writer = tokio::select! {
        guard = handle.writer.lock() => guard,
        _ = handle.closed.notified() => return Err(closed_error()),
    };
    tokio::select! {
        result = writer.write_all(frame) => result,
        _ = handle.closed.notified() => Err(closed_error()),
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection closed")
}

/// One per connected channel: read until EOF or error, decoding frames
/// and publishing messages. The read carries no timeout — an idle peer on
/// a live connection is not a failure. Loop exit always drives the peer
/// to `Closed` through the registry.
async fn listener_loop(
    mut reader: Box<dyn ChannelReader>,
    peer_id: PeerId,
    registry: Arc<Mutex<PeerRegistry>>,
    events: EventBus,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("peer {peer_id} closed the stream");
                break;
            }
            Ok(n) => {
                for text in decoder.push(&buf[..n]) {
                    debug!("message from {peer_id}: {text:?}");
                    events.publish(EngineEvent::MessageReceived(ChatMessage::received(
                        text,
                        peer_id.clone(),
                    )));
                }
            }
            Err(e) => {
                debug!("read error from {peer_id}: {e}");
                break;
            }
        }
    }
    close_peer(&peer_id, &registry, &events, false).await;
}

/// Drive one peer's connection to `Closed`. Removal from the registry is
/// the commit point: whichever caller gets the entry out performs the
/// teardown and notifies observers; every other racing path sees `None`
/// and emits nothing, so notifications fire exactly once per connection.
async fn close_peer(
    peer_id: &PeerId,
    registry: &Arc<Mutex<PeerRegistry>>,
    events: &EventBus,
    abort_reader: bool,
) -> bool {
    let entry = registry.lock().await.remove(peer_id);
    let Some(mut entry) = entry else {
        return false;
    };
    entry.peer.online = false;
    // Unblock any fan-out write stuck on this peer, then take the writer
    // to close it.
    entry.closed.notify_one();
    if abort_reader {
        if let Some(task) = entry.reader_task.take() {
            task.abort();
        }
    }
    {
        let mut writer = entry.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    events.publish(EngineEvent::PeerDisconnected(peer_id.clone()));
    let connected = registry.lock().await.connected_count() > 0;
    events.publish(EngineEvent::ConnectionStatusChanged { connected });
    info!("peer {peer_id} disconnected");
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
