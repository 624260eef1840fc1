//! Periodic store repair.
//!
//! Replication pushes each accepted write once, to the peers alive at that
//! moment. A peer that was suspect, partitioned or not yet known misses the
//! write for good unless something fetches it later. Every interval this
//! engine picks one random alive peer, copies its whole store through
//! [`SnapshotPuller`] and merges it, so every write eventually reaches every
//! node that keeps talking to the cluster.

use murmur_consensus::SnapshotReport;
use murmur_p2p::PeerRegistry;
use murmur_types::PeerAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::sync::SnapshotPuller;

/// Anti-entropy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntiEntropyConfig {
    /// Time between repair rounds.
    pub interval: Duration,
}

impl Default for AntiEntropyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Pulls a random peer's store every interval and merges it.
#[derive(Debug)]
pub struct AntiEntropyEngine {
    registry: Arc<PeerRegistry>,
    puller: SnapshotPuller,
    config: AntiEntropyConfig,
}

impl AntiEntropyEngine {
    /// Creates an anti-entropy engine.
    pub fn new(registry: Arc<PeerRegistry>, puller: SnapshotPuller, config: AntiEntropyConfig) -> Self {
        Self {
            registry,
            puller,
            config,
        }
    }

    /// Runs repair rounds forever, starting one interval from now.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Anti-entropy engine started"
        );

        let start = tokio::time::Instant::now() + self.config.interval;
        let mut ticker = tokio::time::interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Runs one repair round. Returns the peer pulled from and the merge
    /// report, or `None` if no alive peer is known or the pull failed.
    pub async fn tick(&self) -> Option<(PeerAddr, SnapshotReport)> {
        let peer = self.registry.choose_alive(1).into_iter().next()?;

        match self.puller.pull(&peer).await {
            Ok(report) => {
                self.registry.touch(&peer);
                if report.applied > 0 {
                    info!(
                        peer = %peer,
                        applied = report.applied,
                        stale = report.stale,
                        "Anti-entropy repaired entries"
                    );
                } else {
                    debug!(peer = %peer, stale = report.stale, "Anti-entropy found nothing new");
                }
                Some((peer, report))
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Anti-entropy pull failed");
                self.registry.mark_suspect(&peer);
                None
            }
        }
    }
}
