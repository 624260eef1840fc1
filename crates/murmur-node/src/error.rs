//! Node error types.

use murmur_consensus::ConsensusError;
use murmur_p2p::P2pError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// `start` was called on a node that is already running.
    #[error("node already started")]
    AlreadyStarted,

    /// A bootstrap attempt failed.
    #[error("bootstrap attempt failed: {0}")]
    Bootstrap(String),

    /// A peer served a snapshot page that breaks the paging rules.
    #[error("snapshot transfer failed: {0}")]
    Snapshot(String),

    /// Networking failed.
    #[error(transparent)]
    P2p(#[from] P2pError),

    /// The store rejected an operation.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
