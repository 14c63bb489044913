//! Engine error types.

use std::net::SocketAddr;
use std::time::Duration;

use crate::peer::PeerId;

/// Errors that can occur in the linkchat engine.
///
/// Transport-level faults are isolated: a single failed probe, accept, or
/// peer write is reported through this type (or an event) without stopping
/// the discovery scan or the accept loop as a whole. The engine never
/// retries or reconnects on its own — callers observing a failure re-invoke
/// [`connect_to`](crate::engine::ChatEngine::connect_to) or
/// [`start_accepting`](crate::engine::ChatEngine::start_accepting)
/// themselves.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A listener could not be created on the requested address. Fatal to
    /// that accept attempt; the acceptor role stays closed.
    #[error("cannot bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// A connect attempt did not complete in time. The peer stays
    /// uncontacted; the caller may retry manually.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// The remote end refused the connection.
    #[error("connection refused by {0}")]
    Refused(String),

    /// A mid-session read or write failure. Drives the affected peer's
    /// connection to `Closed`; all other peers are unaffected.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Policy rejection, not a transport fault: the peer is already
    /// connected, or a single-session transport already has its one
    /// connection.
    #[error("already connected to {0}")]
    AlreadyConnected(PeerId),

    /// `start_accepting` called while the accept loop is already
    /// running. The running loop is left untouched.
    #[error("acceptor is already listening")]
    AlreadyListening,

    /// The engine has been shut down.
    #[error("engine is not running")]
    NotRunning,

    /// Outbound text contains an embedded newline. The newline-delimited
    /// wire format cannot carry it; this is a documented limitation of the
    /// framing, not something the engine works around silently.
    #[error("message contains an embedded newline and cannot be framed")]
    MessageNotRepresentable,
}
