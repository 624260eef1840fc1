//! Pushes accepted writes to alive peers.

use murmur_consensus::ReplicationHandler;
use murmur_p2p::{Message, PeerRegistry, Transport};
use murmur_types::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends each accepted write as a WriteAccept to every alive peer.
///
/// Each send runs on its own task; nothing waits for delivery.
pub struct PeerReplicator {
    registry: Arc<PeerRegistry>,
    transport: Transport,
}

impl PeerReplicator {
    /// Creates a replicator.
    pub fn new(registry: Arc<PeerRegistry>, transport: Transport) -> Self {
        Self { registry, transport }
    }
}

impl ReplicationHandler for PeerReplicator {
    fn replicate(&self, entry: &Entry) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %entry.key, "No runtime available, write not replicated");
            return;
        };

        let peers = self.registry.alive();
        debug!(key = %entry.key, peers = peers.len(), "Replicating write");

        let message = Arc::new(Message::WriteAccept(entry.clone()));
        for peer in peers {
            let registry = self.registry.clone();
            let transport = self.transport.clone();
            let message = message.clone();
            runtime.spawn(async move {
                match transport.send(&peer, &message).await {
                    Ok(()) => {
                        registry.touch(&peer);
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Replication send failed");
                        registry.mark_suspect(&peer);
                    }
                }
            });
        }
    }
}
