//! Peer data model and the connection registry.
//!
//! The registry is the engine's single synchronization point: every
//! mutation of per-peer connection state goes through it, and it exposes
//! only whole operations (`insert_if_absent`, `remove`, `snapshot`, …) —
//! never the underlying map. Writers are handed out as cloned
//! [`WriterHandle`]s so fan-out writes happen outside the registry lock;
//! a peer that stops reading can stall its own write but never the
//! registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::transport::ChannelWriter;

/// A peer's stable identifier — the remote host address as dialed or
/// observed, or another caller-supplied identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a PeerId from an address or identifier string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// We opened the connection.
    Initiator,
    /// We accepted the connection.
    Acceptor,
}

/// Lifecycle state of a connection (or of the acceptor role itself).
///
/// A single tagged variant rather than a pair of independent booleans, so
/// inconsistent combinations ("server running and client connected") cannot
/// be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No activity yet.
    Idle,
    /// Accept loop is running.
    Listening,
    /// An outbound dial is in flight.
    Connecting,
    /// A live channel exists.
    Connected(Role),
    /// Torn down; a fresh `connect_to`/`start_accepting` is required.
    Closed,
}

/// A remote endpoint known to the engine.
///
/// Identity is `id`; `display_name` is informational only. Immutable except
/// `online`, which flips to `false` when the connection closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub online: bool,
}

impl Peer {
    /// A peer freshly found by discovery or an inbound connection.
    pub fn discovered(id: impl Into<String>) -> Self {
        let id = PeerId::new(id);
        let display_name = format!("Device {id}");
        Self {
            id,
            display_name,
            online: true,
        }
    }
}

/// Whether a message was authored locally or received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// A single chat message. Immutable once constructed; the engine hands it
/// to observers and forgets it — no history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender_id: PeerId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// A locally authored message.
    pub fn sent(text: impl Into<String>, sender_id: PeerId) -> Self {
        Self {
            text: text.into(),
            sender_id,
            direction: Direction::Sent,
            timestamp: Utc::now(),
        }
    }

    /// A message received from a peer.
    pub fn received(text: impl Into<String>, sender_id: PeerId) -> Self {
        Self {
            text: text.into(),
            sender_id,
            direction: Direction::Received,
            timestamp: Utc::now(),
        }
    }
}

/// A live connection owned by the registry: the peer, our role, the
/// outbound writer half, and the listener-loop task reading the inbound
/// half.
///
/// The writer sits behind its own lock so it can be shared with in-flight
/// fan-out passes; `closed` is fired on teardown to cancel a write blocked
/// on an unresponsive peer.
pub struct ConnectionEntry {
    pub peer: Peer,
    pub role: Role,
    pub writer: Arc<Mutex<Box<dyn ChannelWriter>>>,
    pub closed: Arc<Notify>,
    pub reader_task: Option<JoinHandle<()>>,
}

impl ConnectionEntry {
    pub fn new(peer: Peer, role: Role, writer: Box<dyn ChannelWriter>) -> Self {
        Self {
            peer,
            role,
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(Notify::new()),
            reader_task: None,
        }
    }
}

/// One peer's outbound half, cloned out of the registry for a fan-out
/// pass. Holding a handle keeps the writer usable without the registry
/// lock; a teardown racing the pass fires `closed`.
pub struct WriterHandle {
    pub peer_id: PeerId,
    pub writer: Arc<Mutex<Box<dyn ChannelWriter>>>,
    pub closed: Arc<Notify>,
}

/// Registry of currently connected peers.
///
/// Keys (peer ids) are unique; an entry being present implies a live
/// channel. `capacity` carries the transport's session policy: `Some(1)`
/// for pairing-style transports, `None` for the unbounded socket binding.
pub struct PeerRegistry {
    capacity: Option<usize>,
    entries: HashMap<String, ConnectionEntry>,
    // Insertion order; broadcast fan-out walks peers in this order.
    order: Vec<PeerId>,
}

impl PeerRegistry {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Would a connection to `id` be admitted right now?
    ///
    /// Rejects a duplicate peer id, and any second connection when the
    /// transport allows a single session.
    pub fn check_admission(&self, id: &PeerId) -> Result<(), EngineError> {
        if self.entries.contains_key(id.as_str()) {
            return Err(EngineError::AlreadyConnected(id.clone()));
        }
        if let Some(cap) = self.capacity {
            if self.entries.len() >= cap {
                let existing = self.order.first().cloned().unwrap_or_else(|| id.clone());
                return Err(EngineError::AlreadyConnected(existing));
            }
        }
        Ok(())
    }

    /// Insert a connection, rejecting duplicates and capacity overflow.
    /// On rejection the entry is dropped, which closes its channel.
    pub fn insert_if_absent(&mut self, entry: ConnectionEntry) -> Result<(), EngineError> {
        self.check_admission(&entry.peer.id)?;
        let id = entry.peer.id.clone();
        self.order.push(id.clone());
        self.entries.insert(id.0, entry);
        Ok(())
    }

    /// Remove a connection. Returns `None` if the peer is already gone —
    /// callers use this as the exactly-once commit point for teardown.
    pub fn remove(&mut self, id: &PeerId) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(id.as_str())?;
        self.order.retain(|p| p != id);
        Some(entry)
    }

    /// Attach the listener-loop task handle to an entry. If the entry was
    /// already torn down in the meantime, the task is aborted instead.
    pub fn attach_reader_task(&mut self, id: &PeerId, handle: JoinHandle<()>) {
        match self.entries.get_mut(id.as_str()) {
            Some(entry) => entry.reader_task = Some(handle),
            None => handle.abort(),
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.entries.contains_key(id.as_str())
    }

    pub fn connected_count(&self) -> usize {
        self.entries.len()
    }

    /// Copies of all connected peers, in registry order.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id.as_str()))
            .map(|e| e.peer.clone())
            .collect()
    }

    /// Writer handles for every connected peer, in registry order. The
    /// fan-out pass writes through these after releasing the registry
    /// lock, so one stalled peer cannot block unrelated operations.
    pub fn writer_handles(&self) -> Vec<WriterHandle> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id.as_str()))
            .map(|e| WriterHandle {
                peer_id: e.peer.id.clone(),
                writer: Arc::clone(&e.writer),
                closed: Arc::clone(&e.closed),
            })
            .collect()
    }

    /// Take every entry out of the registry, in registry order.
    pub fn drain(&mut self) -> Vec<ConnectionEntry> {
        let ids = std::mem::take(&mut self.order);
        ids.into_iter()
            .filter_map(|id| self.entries.remove(id.as_str()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
