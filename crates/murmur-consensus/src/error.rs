//! Consensus error types.

use thiserror::Error;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The write cannot be stored at all.
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
