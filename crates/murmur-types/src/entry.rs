//! Versioned key-value entries.

use bytes::Bytes;
use std::fmt;

use crate::PeerAddr;

/// A Lamport timestamp paired with the identity of the node that issued it.
///
/// Ordering compares `counter` first and breaks ties on `proposer`, which
/// makes it a total order across the cluster: two distinct writes never
/// compare equal unless they came from the same node with the same counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalTimestamp {
    /// Lamport counter.
    pub counter: u64,
    /// Node that stamped the write.
    pub proposer: PeerAddr,
}

impl LogicalTimestamp {
    /// Creates a new logical timestamp.
    #[must_use]
    pub fn new(counter: u64, proposer: PeerAddr) -> Self {
        Self { counter, proposer }
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.counter, self.proposer)
    }
}

/// The value side of a write: either data or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// A stored value.
    Present(Bytes),
    /// A deletion. Tombstones are kept so older writes cannot resurrect a key.
    Tombstone,
}

impl Value {
    /// Returns the value bytes, or `None` for a tombstone.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Present(bytes) => Some(bytes),
            Value::Tombstone => None,
        }
    }

    /// Returns true if this is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    /// Returns the payload length (zero for tombstones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, Bytes::len)
    }

    /// Returns true if there is no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Present(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Present(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Present(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Present(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Tombstone => write!(f, "<deleted>"),
        }
    }
}

/// A key, its value and the timestamp of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// The key.
    pub key: String,
    /// The value or tombstone.
    pub value: Value,
    /// Timestamp of the write.
    pub timestamp: LogicalTimestamp,
}

impl Entry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Value>, timestamp: LogicalTimestamp) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Creates a tombstone entry.
    #[must_use]
    pub fn tombstone(key: impl Into<String>, timestamp: LogicalTimestamp) -> Self {
        Self {
            key: key.into(),
            value: Value::Tombstone,
            timestamp,
        }
    }
}
