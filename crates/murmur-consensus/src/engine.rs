//! Consensus engine.
//!
//! Every write carries a [`LogicalTimestamp`]. A write is accepted iff its
//! timestamp is strictly greater than the one stored for its key, so any two
//! nodes that have seen the same set of writes hold the same value for every
//! key regardless of delivery order. Writes originating here, or proposed to
//! this node by a peer, are pushed to the rest of the cluster through a
//! [`ReplicationHandler`] once accepted.

use murmur_types::{Entry, LogicalTimestamp, PeerAddr, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::clock::LamportClock;
use crate::error::{ConsensusError, Result};
use crate::store::{ApplyOutcome, ReplicatedStore};

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Callback trait for pushing accepted writes to peers.
///
/// Implementations must not block: delivery is fire-and-forget.
pub trait ReplicationHandler: Send + Sync + 'static {
    /// Send an accepted write to every alive peer.
    fn replicate(&self, entry: &Entry);
}

/// Acceptance status of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStatus {
    /// Stamped but not yet decided.
    Proposed,
    /// Newer than the stored entry; applied.
    Accepted,
    /// Not newer than the stored entry; discarded.
    Rejected,
}

impl WriteStatus {
    /// Returns a static label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            WriteStatus::Proposed => "proposed",
            WriteStatus::Accepted => "accepted",
            WriteStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// The write.
    pub entry: Entry,
    /// Its status.
    pub status: WriteStatus,
}

impl WriteRecord {
    fn proposed(entry: Entry) -> Self {
        Self {
            entry,
            status: WriteStatus::Proposed,
        }
    }

    /// Returns true if the write was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == WriteStatus::Accepted
    }
}

/// Where a write entered this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteSource {
    /// Proposed through this node's own interface.
    Local,
    /// Proposed by a peer with WritePropose.
    Proposal,
    /// Replicated from a peer with WriteAccept.
    Replica,
    /// Received as part of a snapshot, at bootstrap or during anti-entropy.
    Snapshot,
}

impl WriteSource {
    /// Returns a static label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            WriteSource::Local => "local",
            WriteSource::Proposal => "proposal",
            WriteSource::Replica => "replica",
            WriteSource::Snapshot => "snapshot",
        }
    }
}

/// Summary of applying a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Entries that were newer and got stored.
    pub applied: usize,
    /// Entries that were not newer than what was stored.
    pub stale: usize,
    /// Entries that could not be stored at all.
    pub invalid: usize,
}

impl std::ops::AddAssign for SnapshotReport {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.invalid += other.invalid;
    }
}

/// Events emitted by the consensus engine.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A write was applied.
    WriteAccepted {
        /// The stored entry.
        entry: Entry,
        /// Where it came from.
        source: WriteSource,
    },
    /// A write lost to the stored entry.
    WriteRejected {
        /// The discarded write.
        entry: Entry,
        /// Where it came from.
        source: WriteSource,
    },
    /// A snapshot finished applying.
    SnapshotApplied(SnapshotReport),
}

/// The consensus engine: sole writer of the replicated store.
pub struct ConsensusEngine {
    local: PeerAddr,
    clock: LamportClock,
    store: ReplicatedStore,
    handler: Option<Arc<dyn ReplicationHandler>>,
    events: broadcast::Sender<ConsensusEvent>,
}

impl ConsensusEngine {
    /// Creates an engine for node `local` over `store`.
    #[must_use]
    pub fn new(local: PeerAddr, store: ReplicatedStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local,
            clock: LamportClock::new(),
            store,
            handler: None,
            events,
        }
    }

    /// Sets the handler used to replicate accepted writes.
    #[must_use]
    pub fn with_replication(mut self, handler: Arc<dyn ReplicationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Returns the identity stamped on local writes.
    #[must_use]
    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    /// Returns the Lamport clock.
    #[must_use]
    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    /// Proposes a local write of `value` to `key`.
    pub fn propose(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<WriteRecord> {
        let key = key.into();
        check_key(&key)?;

        let timestamp = LogicalTimestamp::new(self.clock.tick(), self.local.clone());
        let record = self.decide(Entry::new(key, value, timestamp), WriteSource::Local)?;
        if record.is_accepted() {
            self.replicate(&record.entry);
        }
        Ok(record)
    }

    /// Proposes a local deletion of `key`.
    pub fn delete(&self, key: impl Into<String>) -> Result<WriteRecord> {
        self.propose(key, Value::Tombstone)
    }

    /// Decides a write proposed by a peer with its own timestamp.
    pub fn propose_record(&self, entry: Entry) -> Result<WriteRecord> {
        check_key(&entry.key)?;
        self.clock.observe(entry.timestamp.counter);

        let record = self.decide(entry, WriteSource::Proposal)?;
        if record.is_accepted() {
            self.replicate(&record.entry);
        }
        Ok(record)
    }

    /// Applies a write a peer has already accepted. Never re-replicated.
    pub fn apply_replicated(&self, entry: Entry) -> Result<WriteRecord> {
        check_key(&entry.key)?;
        self.clock.observe(entry.timestamp.counter);
        self.decide(entry, WriteSource::Replica)
    }

    /// Applies snapshot entries through the same comparison as any write.
    ///
    /// Entries that are invalid on their own are counted and skipped.
    pub fn apply_snapshot(&self, entries: Vec<Entry>) -> Result<SnapshotReport> {
        let mut report = SnapshotReport::default();

        for entry in entries {
            if check_key(&entry.key).is_err() {
                report.invalid += 1;
                continue;
            }
            self.clock.observe(entry.timestamp.counter);
            match self.decide(entry, WriteSource::Snapshot)?.status {
                WriteStatus::Accepted => report.applied += 1,
                _ => report.stale += 1,
            }
        }

        debug!(
            applied = report.applied,
            stale = report.stale,
            invalid = report.invalid,
            clock = self.clock.current(),
            "Applied snapshot page"
        );
        let _ = self.events.send(ConsensusEvent::SnapshotApplied(report));
        Ok(report)
    }

    /// Returns the stored entry for `key`, tombstones included.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        self.store.get(key)
    }

    /// Returns the stored value for `key`, or `None` if absent or deleted.
    pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .store
            .get(key)?
            .map(|entry| entry.value)
            .filter(|value| !value.is_tombstone()))
    }

    /// Returns every stored entry, sorted by key.
    pub fn snapshot(&self) -> Result<Vec<Entry>> {
        self.store.entries()
    }

    /// Returns the number of stored keys, tombstones included.
    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    fn decide(&self, entry: Entry, source: WriteSource) -> Result<WriteRecord> {
        let mut record = WriteRecord::proposed(entry);

        match self.store.apply(record.entry.clone())? {
            ApplyOutcome::Applied => {
                record.status = WriteStatus::Accepted;
                debug!(
                    key = %record.entry.key,
                    timestamp = %record.entry.timestamp,
                    source = source.as_str(),
                    "Write accepted"
                );
                let _ = self.events.send(ConsensusEvent::WriteAccepted {
                    entry: record.entry.clone(),
                    source,
                });
            }
            ApplyOutcome::Stale { current } => {
                record.status = WriteStatus::Rejected;
                debug!(
                    key = %record.entry.key,
                    timestamp = %record.entry.timestamp,
                    current = %current.timestamp,
                    source = source.as_str(),
                    "Write rejected"
                );
                let _ = self.events.send(ConsensusEvent::WriteRejected {
                    entry: record.entry.clone(),
                    source,
                });
            }
        }

        Ok(record)
    }

    fn replicate(&self, entry: &Entry) {
        if let Some(handler) = &self.handler {
            handler.replicate(entry);
        }
    }
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("local", &self.local)
            .field("clock", &self.clock.current())
            .field("store", &self.store)
            .finish()
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ConsensusError::InvalidWrite("empty key".into()));
    }
    Ok(())
}
