//! # Murmur P2P
//!
//! Peer-to-peer networking layer for Murmur.
//!
//! This crate owns everything a node needs to find and talk to its peers:
//!
//! - [`message`]: the binary wire codec and per-message validation
//! - [`PeerRegistry`]: the in-memory set of known peers and their liveness
//! - [`Transport`] and [`Listener`]: the TCP connection layer
//! - [`GossipEngine`]: periodic anti-entropy exchange of peer samples
//! - [`PruningEngine`]: periodic eviction of silent peers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod gossip;
pub mod message;
mod pruning;
mod registry;
mod transport;

pub use error::{P2pError, Result};
pub use gossip::{GossipConfig, GossipEngine, GossipRound};
pub use message::{Message, MessageKind, MessageLimits, PeerSample};
pub use pruning::{PruneReport, PruningConfig, PruningEngine};
pub use registry::{PeerRecord, PeerRegistry, PeerState};
pub use transport::{Listener, MessageHandler, TrafficObserver, Transport, TransportConfig};

/// Default port for Murmur peer communication.
pub const DEFAULT_PORT: u16 = 8411;

/// Maximum size of a single wire frame (8 MiB).
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;
