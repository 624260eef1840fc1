//! Paged snapshot transfer.
//!
//! Bootstrap and anti-entropy both copy a peer's store the same way: ask for
//! the first page, merge it, then ask for the page after the last key
//! received until the peer reports that nothing remains. Each page is merged
//! as it arrives, so a transfer cut short keeps what it already got.

use murmur_consensus::{ConsensusEngine, SnapshotReport};
use murmur_p2p::{Message, MessageKind, MessageLimits, P2pError, Transport};
use murmur_types::PeerAddr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{NodeError, Result};

/// Pulls whole snapshots from peers and merges them into the local store.
#[derive(Clone)]
pub struct SnapshotPuller {
    transport: Transport,
    consensus: Arc<ConsensusEngine>,
    limits: MessageLimits,
}

impl SnapshotPuller {
    /// Creates a puller.
    pub fn new(transport: Transport, consensus: Arc<ConsensusEngine>, limits: MessageLimits) -> Self {
        Self {
            transport,
            consensus,
            limits,
        }
    }

    /// Copies every entry `peer` holds, one page per exchange.
    ///
    /// Fails on the first page that cannot be fetched, does not validate, or
    /// does not move past the previous page.
    pub async fn pull(&self, peer: &PeerAddr) -> Result<SnapshotReport> {
        let mut report = SnapshotReport::default();
        let mut after: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = Message::SnapshotRequest {
                after: after.clone(),
            };
            let reply = self
                .transport
                .request_kind(peer, &request, MessageKind::SnapshotResponse)
                .await?;
            reply.validate(&self.limits)?;

            let (entries, more) = match reply {
                Message::SnapshotResponse { entries, more } => (entries, more),
                other => {
                    return Err(P2pError::UnexpectedResponse {
                        expected: MessageKind::SnapshotResponse,
                        actual: other.kind(),
                    }
                    .into())
                }
            };

            if let (Some(cursor), Some(first)) = (&after, entries.first()) {
                if first.key <= *cursor {
                    return Err(NodeError::Snapshot(format!(
                        "page from {} starts at {:?}, not after {:?}",
                        peer, first.key, cursor
                    )));
                }
            }

            let last = entries.last().map(|entry| entry.key.clone());
            report += self.consensus.apply_snapshot(entries)?;
            pages += 1;

            if !more {
                break;
            }
            let Some(last) = last else {
                return Err(NodeError::Snapshot(format!("empty page from {} claims more", peer)));
            };
            after = Some(last);
        }

        debug!(
            peer = %peer,
            pages,
            applied = report.applied,
            stale = report.stale,
            "Snapshot transfer complete"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for SnapshotPuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPuller")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_consensus::ReplicatedStore;
    use murmur_p2p::{Listener, MessageHandler, TransportConfig};
    use murmur_types::{Entry, LogicalTimestamp};
    use parking_lot::Mutex;
    use std::net::SocketAddr;

    /// Serves `entries` in pages sized by the frame limit and records cursors.
    struct PagedServer {
        entries: Vec<Entry>,
        max_frame_bytes: usize,
        cursors: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl MessageHandler for PagedServer {
        async fn handle(
            &self,
            _remote: SocketAddr,
            message: Message,
        ) -> murmur_p2p::Result<Option<Message>> {
            match message {
                Message::SnapshotRequest { after } => {
                    let page = Message::snapshot_page(
                        &self.entries,
                        after.as_deref(),
                        self.max_frame_bytes,
                        usize::MAX,
                    );
                    self.cursors.lock().push(after);
                    Ok(Some(page))
                }
                _ => Ok(None),
            }
        }
    }

    /// Always answers with the same page and claims more remain.
    struct Stuck(Entry);

    #[async_trait]
    impl MessageHandler for Stuck {
        async fn handle(
            &self,
            _remote: SocketAddr,
            _message: Message,
        ) -> murmur_p2p::Result<Option<Message>> {
            Ok(Some(Message::SnapshotResponse {
                entries: vec![self.0.clone()],
                more: true,
            }))
        }
    }

    fn small_frames() -> TransportConfig {
        TransportConfig {
            max_frame_bytes: 4096,
            ..TransportConfig::default()
        }
    }

    async fn serve(handler: Arc<dyn MessageHandler>) -> PeerAddr {
        let listener = Listener::bind("127.0.0.1:0", small_frames()).await.unwrap();
        let addr = PeerAddr::from(listener.local_addr().unwrap());
        tokio::spawn(listener.serve(handler));
        addr
    }

    fn puller() -> (SnapshotPuller, Arc<ConsensusEngine>) {
        let consensus = Arc::new(ConsensusEngine::new(
            PeerAddr::new("127.0.0.1", 1),
            ReplicatedStore::in_memory(),
        ));
        let puller = SnapshotPuller::new(
            Transport::new(small_frames()),
            consensus.clone(),
            MessageLimits::default(),
        );
        (puller, consensus)
    }

    fn entries(count: u64, value_len: usize) -> Vec<Entry> {
        let holder = PeerAddr::new("127.0.0.1", 9);
        (0..count)
            .map(|i| {
                let value = vec![b'v'; value_len];
                Entry::new(format!("key-{}", i), value, LogicalTimestamp::new(i + 1, holder.clone()))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_store_larger_than_one_frame_arrives_in_pages() {
        // Eight 1000-byte values do not fit one 4096-byte frame
        let stored = entries(8, 1000);
        let server = Arc::new(PagedServer {
            entries: stored.clone(),
            max_frame_bytes: 4096,
            cursors: Mutex::new(Vec::new()),
        });
        let addr = serve(server.clone()).await;

        let (puller, consensus) = puller();
        let report = puller.pull(&addr).await.unwrap();

        assert_eq!(report.applied, 8);
        assert_eq!(consensus.snapshot().unwrap(), stored);
        assert_eq!(consensus.clock().current(), 8);

        let cursors = server.cursors.lock().clone();
        assert!(cursors.len() > 1);
        assert_eq!(cursors[0], None);
        assert!(cursors[1..].iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_empty_store_is_one_page() {
        let server = Arc::new(PagedServer {
            entries: vec![],
            max_frame_bytes: 4096,
            cursors: Mutex::new(Vec::new()),
        });
        let addr = serve(server.clone()).await;

        let (puller, consensus) = puller();
        assert_eq!(puller.pull(&addr).await.unwrap(), SnapshotReport::default());
        assert!(consensus.is_empty().unwrap());
        assert_eq!(server.cursors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_page_that_does_not_advance_fails() {
        let stuck = entries(1, 4).remove(0);
        let addr = serve(Arc::new(Stuck(stuck))).await;

        let (puller, consensus) = puller();
        assert!(matches!(puller.pull(&addr).await, Err(NodeError::Snapshot(_))));
        // The first page was still merged
        assert_eq!(consensus.len().unwrap(), 1);
    }
}
