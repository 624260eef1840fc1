//! # Murmur Consensus
//!
//! Last-writer-wins agreement for the Murmur key-value store.
//!
//! Writes are ordered by a [`LogicalTimestamp`](murmur_types::LogicalTimestamp)
//! made of a Lamport counter and the proposing node's identity. The
//! [`ConsensusEngine`] is the only component that mutates the
//! [`ReplicatedStore`], and it applies a write only when its timestamp is
//! strictly greater than the stored one.
//!
//! ## Example
//!
//! ```
//! use murmur_consensus::{ConsensusEngine, ReplicatedStore, WriteStatus};
//! use murmur_types::PeerAddr;
//!
//! let engine = ConsensusEngine::new(PeerAddr::new("127.0.0.1", 8411), ReplicatedStore::in_memory());
//! let record = engine.propose("greeting", "hello").unwrap();
//! assert_eq!(record.status, WriteStatus::Accepted);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod engine;
mod error;
mod store;

pub use clock::LamportClock;
pub use engine::{
    ConsensusEngine, ConsensusEvent, ReplicationHandler, SnapshotReport, WriteRecord,
    WriteSource, WriteStatus,
};
pub use error::{ConsensusError, Result};
pub use store::{ApplyOutcome, MemoryBackend, ReplicatedStore, StorageBackend};
