//! Common types used throughout `murmur`.
//!
//! This crate provides the identity and versioning types shared by the
//! networking, consensus and node crates:
//!
//! - [`PeerAddr`]: the `(host, port)` identity of a node
//! - [`Timestamp`]: wall-clock milliseconds used for peer liveness
//! - [`LogicalTimestamp`]: the Lamport `(counter, proposer)` pair that orders writes
//! - [`Value`] and [`Entry`]: a versioned key-value mutation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod addr;
mod entry;
mod timestamp;

pub use addr::{AddrParseError, PeerAddr};
pub use entry::{Entry, LogicalTimestamp, Value};
pub use timestamp::Timestamp;
