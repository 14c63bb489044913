//! Engine events — the observer surface.
//!
//! The engine publishes every observable change onto a broadcast channel.
//! Each collaborator (UI, tests) calls
//! [`subscribe`](crate::engine::ChatEngine::subscribe) for its own
//! receiver and drains it on whatever task or thread it likes, so the
//! engine never executes collaborator code and subscribers cannot clobber
//! each other the way a single mutable callback slot would.

use tokio::sync::broadcast;
use tracing::trace;

use crate::peer::{ChatMessage, Peer, PeerId};

/// An observable engine event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A discovery probe succeeded. Pushed as soon as the probe completes;
    /// de-duplication across scans is the subscriber's responsibility.
    DeviceDiscovered(Peer),
    /// A discovery scan stopped issuing results.
    DiscoveryFinished { peers_found: usize },
    /// A frame arrived and was decoded.
    MessageReceived(ChatMessage),
    /// A peer transitioned to connected. Fired once per connection.
    PeerConnected(PeerId),
    /// A peer transitioned to closed. Fired exactly once per connection,
    /// whichever teardown path wins.
    PeerDisconnected(PeerId),
    /// Coarse connectivity signal: whether any peer is connected.
    ConnectionStatusChanged { connected: bool },
    /// An outbound dial failed. The peer stays uncontacted.
    ConnectionFailed { peer: PeerId, reason: String },
}

/// Multi-subscriber event publisher.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// A fresh, independent receiver. Slow subscribers lag (dropping their
    /// oldest events) rather than blocking the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine; events are best-effort notifications.
        if self.tx.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
