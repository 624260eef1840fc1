//! Peer registry.
//!
//! The registry is the single source of truth for which peers this node
//! knows and when it last heard from them. Every operation takes one short
//! lock and never performs I/O while holding it; callers that need to iterate
//! take a snapshot with [`PeerRegistry::list`].

use murmur_types::{PeerAddr, Timestamp};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;

use crate::PeerSample;

/// Liveness state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Heard from within the liveness deadline.
    Alive,
    /// Silent past the liveness deadline or unreachable, but still in its grace window.
    Suspect,
    /// Considered gone; about to be removed.
    Dead,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::Alive => "alive",
            PeerState::Suspect => "suspect",
            PeerState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// The peer's identity.
    pub addr: PeerAddr,
    /// When we last heard from the peer, directly or through gossip.
    pub last_seen: Timestamp,
    /// Current liveness state.
    pub state: PeerState,
}

impl PeerRecord {
    fn new(addr: PeerAddr, last_seen: Timestamp) -> Self {
        Self {
            addr,
            last_seen,
            state: PeerState::Alive,
        }
    }

    /// Returns this record as a gossip sample entry.
    #[must_use]
    pub fn to_sample(&self) -> PeerSample {
        PeerSample::new(self.addr.clone(), self.last_seen)
    }
}

/// The set of peers known to this node.
pub struct PeerRegistry {
    local: PeerAddr,
    peers: RwLock<HashMap<PeerAddr, PeerRecord>>,
    inserted: Notify,
}

impl PeerRegistry {
    /// Creates an empty registry for the node identified by `local`.
    ///
    /// The local identity is never recorded as a peer.
    #[must_use]
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
            inserted: Notify::new(),
        }
    }

    /// Returns the identity of the node owning this registry.
    #[must_use]
    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    /// Records contact with `addr` observed at `observed_at`.
    ///
    /// Creates the record if needed, marks it alive and raises `last_seen`
    /// (it never moves backwards). Returns true if the peer was new.
    pub fn upsert(&self, addr: &PeerAddr, observed_at: Timestamp) -> bool {
        if *addr == self.local {
            return false;
        }

        let created = {
            let mut peers = self.peers.write();
            match peers.get_mut(addr) {
                Some(record) => {
                    record.last_seen = record.last_seen.max(observed_at);
                    record.state = PeerState::Alive;
                    false
                }
                None => {
                    peers.insert(addr.clone(), PeerRecord::new(addr.clone(), observed_at));
                    true
                }
            }
        };

        if created {
            tracing::debug!(peer = %addr, "Discovered peer");
            self.inserted.notify_waiters();
        }
        created
    }

    /// Records direct contact with `addr` right now.
    pub fn touch(&self, addr: &PeerAddr) -> bool {
        self.upsert(addr, Timestamp::now())
    }

    /// Merges a gossiped `(addr, last_seen)` pair.
    ///
    /// Unknown peers are inserted as alive. Known peers take the newer
    /// `last_seen` and become alive only if it advanced, so applying the same
    /// set of pairs in any order or multiplicity yields the same registry.
    pub fn merge(&self, addr: &PeerAddr, last_seen: Timestamp) -> bool {
        if *addr == self.local {
            return false;
        }

        let created = {
            let mut peers = self.peers.write();
            match peers.get_mut(addr) {
                Some(record) => {
                    if last_seen > record.last_seen {
                        record.last_seen = last_seen;
                        record.state = PeerState::Alive;
                    }
                    false
                }
                None => {
                    peers.insert(addr.clone(), PeerRecord::new(addr.clone(), last_seen));
                    true
                }
            }
        };

        if created {
            tracing::debug!(peer = %addr, "Learned peer through gossip");
            self.inserted.notify_waiters();
        }
        created
    }

    /// Merges every entry of a gossip sample. Returns the number of new peers.
    pub fn merge_sample(&self, sample: &[PeerSample]) -> usize {
        sample
            .iter()
            .filter(|peer| self.merge(&peer.addr, peer.last_seen))
            .count()
    }

    /// Marks an alive peer as suspect. Returns true if the state changed.
    pub fn mark_suspect(&self, addr: &PeerAddr) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(addr) {
            Some(record) if record.state == PeerState::Alive => {
                record.state = PeerState::Suspect;
                true
            }
            _ => false,
        }
    }

    /// Marks a peer suspect if it has not been seen since `cutoff`.
    ///
    /// The check and the update happen under one lock, so a contact that
    /// lands after the caller's snapshot is never overridden.
    pub fn suspect_if_stale(&self, addr: &PeerAddr, cutoff: Timestamp) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(addr) {
            Some(record) if record.last_seen < cutoff && record.state == PeerState::Alive => {
                record.state = PeerState::Suspect;
                true
            }
            _ => false,
        }
    }

    /// Removes a peer if it has not been seen since `cutoff`.
    pub fn remove_if_stale(&self, addr: &PeerAddr, cutoff: Timestamp) -> Option<PeerRecord> {
        let mut peers = self.peers.write();
        match peers.get(addr) {
            Some(record) if record.last_seen < cutoff => peers.remove(addr).map(|mut record| {
                record.state = PeerState::Dead;
                record
            }),
            _ => None,
        }
    }

    /// Removes a peer. Returns the removed record.
    pub fn remove(&self, addr: &PeerAddr) -> Option<PeerRecord> {
        self.peers.write().remove(addr)
    }

    /// Returns a copy of a single record.
    #[must_use]
    pub fn get(&self, addr: &PeerAddr) -> Option<PeerRecord> {
        self.peers.read().get(addr).cloned()
    }

    /// Returns a point-in-time snapshot of every record, sorted by identity.
    #[must_use]
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut records: Vec<_> = self.peers.read().values().cloned().collect();
        records.sort_by(|a, b| a.addr.cmp(&b.addr));
        records
    }

    /// Returns the identities of all alive peers.
    #[must_use]
    pub fn alive(&self) -> Vec<PeerAddr> {
        self.peers
            .read()
            .values()
            .filter(|record| record.state == PeerState::Alive)
            .map(|record| record.addr.clone())
            .collect()
    }

    /// Returns the number of alive peers.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|record| record.state == PeerState::Alive)
            .count()
    }

    /// Picks up to `count` random alive peers.
    #[must_use]
    pub fn choose_alive(&self, count: usize) -> Vec<PeerAddr> {
        let alive = self.alive();
        alive
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect()
    }

    /// Picks up to `count` random records (any state) as gossip samples,
    /// leaving out `exclude`.
    #[must_use]
    pub fn sample(&self, count: usize, exclude: Option<&PeerAddr>) -> Vec<PeerSample> {
        let records: Vec<PeerSample> = self
            .peers
            .read()
            .values()
            .filter(|record| Some(&record.addr) != exclude)
            .map(PeerRecord::to_sample)
            .collect();
        records
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect()
    }

    /// Returns the number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns true if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Waits up to `timeout` for an alive peer to be known and returns one at random.
    ///
    /// `avoid` lists peers to skip unless they are the only ones left.
    pub async fn wait_for_peer(&self, timeout: Duration, avoid: &[PeerAddr]) -> Option<PeerAddr> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so an insert between the
            // check and the await is not missed.
            let notified = self.inserted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(peer) = self.pick_avoiding(avoid) {
                return Some(peer);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pick_avoiding(avoid);
            }
        }
    }

    fn pick_avoiding(&self, avoid: &[PeerAddr]) -> Option<PeerAddr> {
        let alive = self.alive();
        let preferred: Vec<_> = alive.iter().filter(|a| !avoid.contains(a)).collect();
        let mut rng = rand::thread_rng();
        match preferred.choose(&mut rng) {
            Some(peer) => Some((*peer).clone()),
            None => alive.choose(&mut rng).cloned(),
        }
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("local", &self.local)
            .field("peers", &self.len())
            .finish()
    }
}
