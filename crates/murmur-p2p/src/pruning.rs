//! Eviction of silent peers.

use murmur_types::Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::PeerRegistry;

/// Pruning configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruningConfig {
    /// Time between pruning passes.
    pub interval: Duration,
    /// Silence after which a peer becomes suspect.
    pub liveness_deadline: Duration,
    /// Additional silence after which a suspect peer is removed.
    pub grace_window: Duration,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            liveness_deadline: Duration::from_secs(10),
            grace_window: Duration::from_secs(20),
        }
    }
}

/// Result of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Peers that became suspect.
    pub suspected: usize,
    /// Peers removed from the registry.
    pub removed: usize,
}

/// Periodically demotes and removes peers that have gone quiet.
#[derive(Debug)]
pub struct PruningEngine {
    registry: Arc<PeerRegistry>,
    config: PruningConfig,
}

impl PruningEngine {
    /// Creates a pruning engine.
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>, config: PruningConfig) -> Self {
        Self { registry, config }
    }

    /// Runs pruning passes forever.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            deadline_ms = self.config.liveness_deadline.as_millis() as u64,
            grace_ms = self.config.grace_window.as_millis() as u64,
            "Pruning engine started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.prune_once(Timestamp::now());
            if report.removed > 0 {
                info!(
                    removed = report.removed,
                    remaining = self.registry.len(),
                    "Pruned silent peers"
                );
            }
        }
    }

    /// Runs one pruning pass as of `now`.
    pub fn prune_once(&self, now: Timestamp) -> PruneReport {
        let suspect_before = now.saturating_sub(self.config.liveness_deadline);
        let remove_before = suspect_before.saturating_sub(self.config.grace_window);

        let mut report = PruneReport::default();
        for record in self.registry.list() {
            if record.last_seen < remove_before {
                if let Some(removed) = self.registry.remove_if_stale(&record.addr, remove_before) {
                    debug!(
                        peer = %removed.addr,
                        age_ms = removed.last_seen.age(now).as_millis() as u64,
                        "Removing dead peer"
                    );
                    report.removed += 1;
                }
            } else if record.last_seen < suspect_before
                && self.registry.suspect_if_stale(&record.addr, suspect_before)
            {
                debug!(peer = %record.addr, "Peer missed liveness deadline");
                report.suspected += 1;
            }
        }
        report
    }
}
