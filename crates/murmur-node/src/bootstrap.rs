//! One-shot store synchronization at startup.
//!
//! A joining node waits for gossip to surface an alive peer, copies its store
//! page by page and merges every entry through the consensus comparison, so
//! a snapshot can never roll back a write this node already holds. Peers
//! that fail to answer are avoided on later attempts while alternatives
//! exist.

use murmur_consensus::SnapshotReport;
use murmur_p2p::PeerRegistry;
use murmur_types::PeerAddr;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{NodeError, Result};
use crate::resilience::RetryPolicy;
use crate::sync::SnapshotPuller;

/// Bootstrap configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// How long one attempt waits for an alive peer to be known.
    pub peer_wait: Duration,
    /// Attempt count and backoff between attempts.
    pub retry: RetryPolicy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            peer_wait: Duration::from_secs(3),
            retry: RetryPolicy::new(5, Duration::from_millis(200)),
        }
    }
}

/// How bootstrap ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No seeds and no known peers: this node starts a new cluster.
    Standalone,
    /// A snapshot was received and merged.
    Synced {
        /// Peer that served the snapshot.
        peer: PeerAddr,
        /// What the merge did.
        report: SnapshotReport,
    },
    /// Every attempt failed; the node runs with what it has.
    Degraded {
        /// Attempts made.
        attempts: u32,
    },
}

impl BootstrapOutcome {
    /// Returns a short label for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BootstrapOutcome::Standalone => "standalone",
            BootstrapOutcome::Synced { .. } => "synced",
            BootstrapOutcome::Degraded { .. } => "degraded",
        }
    }
}

impl fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapOutcome::Synced { peer, report } => {
                write!(f, "synced from {} ({} entries applied)", peer, report.applied)
            }
            BootstrapOutcome::Degraded { attempts } => {
                write!(f, "degraded after {} attempts", attempts)
            }
            BootstrapOutcome::Standalone => f.write_str("standalone"),
        }
    }
}

/// Pulls the initial store contents from a peer.
pub struct BootstrapEngine {
    registry: Arc<PeerRegistry>,
    puller: SnapshotPuller,
    config: BootstrapConfig,
    has_seeds: bool,
}

impl BootstrapEngine {
    /// Creates a bootstrap engine.
    pub fn new(
        registry: Arc<PeerRegistry>,
        puller: SnapshotPuller,
        config: BootstrapConfig,
        has_seeds: bool,
    ) -> Self {
        Self {
            registry,
            puller,
            config,
            has_seeds,
        }
    }

    /// Runs bootstrap to completion.
    pub async fn run(&self) -> BootstrapOutcome {
        if !self.has_seeds && self.registry.is_empty() {
            info!("No seeds configured, starting standalone");
            return BootstrapOutcome::Standalone;
        }

        let bad_peers = Mutex::new(Vec::new());
        let result = self
            .config
            .retry
            .execute(|attempt| {
                let bad_peers = &bad_peers;
                async move { self.attempt(attempt, bad_peers).await }
            })
            .await;

        match result {
            Ok((peer, report)) => {
                info!(
                    peer = %peer,
                    applied = report.applied,
                    stale = report.stale,
                    "Bootstrap complete"
                );
                BootstrapOutcome::Synced { peer, report }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    attempts = self.config.retry.max_attempts,
                    "Bootstrap failed, continuing with local state"
                );
                BootstrapOutcome::Degraded {
                    attempts: self.config.retry.max_attempts,
                }
            }
        }
    }

    async fn attempt(
        &self,
        attempt: u32,
        bad_peers: &Mutex<Vec<PeerAddr>>,
    ) -> Result<(PeerAddr, SnapshotReport)> {
        let avoid = bad_peers.lock().clone();
        let peer = self
            .registry
            .wait_for_peer(self.config.peer_wait, &avoid)
            .await
            .ok_or_else(|| NodeError::Bootstrap("no alive peer known".into()))?;

        info!(peer = %peer, attempt, "Requesting snapshot");
        match self.puller.pull(&peer).await {
            Ok(report) => {
                self.registry.touch(&peer);
                Ok((peer, report))
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Snapshot transfer failed");
                self.registry.mark_suspect(&peer);
                bad_peers.lock().push(peer);
                Err(e)
            }
        }
    }
}
