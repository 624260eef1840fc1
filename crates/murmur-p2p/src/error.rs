//! P2P error types.

use murmur_types::PeerAddr;
use thiserror::Error;

use crate::MessageKind;

/// Errors that can occur during P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Connection to a peer failed.
    #[error("connection to {peer} failed: {reason}")]
    Connection {
        /// The peer we tried to reach.
        peer: PeerAddr,
        /// Why it failed.
        reason: String,
    },

    /// A network operation did not complete in time.
    #[error("timed out {0}")]
    Timeout(String),

    /// A message failed to decode or validate.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A frame exceeded the configured size limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The peer answered with a message of the wrong kind.
    #[error("unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        /// Kind we were waiting for.
        expected: MessageKind,
        /// Kind we received.
        actual: MessageKind,
    },

    /// The peer closed the connection before answering.
    #[error("connection closed by {0}")]
    Closed(PeerAddr),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl P2pError {
    /// Returns true if the error was caused by malformed peer input.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            P2pError::InvalidMessage(_) | P2pError::FrameTooLarge { .. }
        )
    }
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
