//! Linkchat Engine — peer connection and messaging for LAN chat.
//!
//! This crate provides the connection layer for a serverless peer-to-peer
//! chat: peers discover each other by probing the local subnet, connect
//! directly, and exchange newline-delimited UTF-8 text frames. There is no
//! broker and no relay; every participant runs the same engine.
//!
//! # Architecture
//!
//! - **Transport**: pluggable media behind the [`Transport`] trait, with
//!   two bindings: [`TcpTransport`] for the local-network socket medium
//!   and [`PairingTransport`] for a one-session-at-a-time pairing medium.
//! - **Discovery**: bounded connect-probes across the local /24 plus
//!   configured candidates; reachable peers stream in as events.
//! - **Messaging**: newline-delimited UTF-8 frames, broadcast to every
//!   connected peer with per-peer failure isolation.
//! - **Events**: a multi-subscriber broadcast surface; the engine never
//!   executes observer code.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use linkchat_engine::{ChatEngine, EngineConfig, TcpTransport};
//!
//! # async fn example() {
//! let engine = ChatEngine::new(TcpTransport, EngineConfig::default());
//! let mut events = engine.subscribe();
//!
//! engine.start_accepting().await.unwrap();
//! // ... peers connect, messages arrive on `events` ...
//! engine.send("hello, room").await.unwrap();
//! engine.shutdown().await;
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod pairing;
pub mod peer;
pub mod tcp;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use codec::{FRAME_DELIMITER, FrameDecoder, encode_frame};
pub use config::EngineConfig;
pub use discovery::DiscoveryConfig;
pub use engine::{ChatEngine, SendOutcome};
pub use error::EngineError;
pub use event::{EngineEvent, EventBus};
pub use pairing::PairingTransport;
pub use peer::{ChatMessage, ConnectionState, Direction, Peer, PeerId, PeerRegistry, Role};
pub use tcp::TcpTransport;
pub use transport::{Channel, ChannelReader, ChannelWriter, Listener, Transport};
