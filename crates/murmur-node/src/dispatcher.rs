//! Routes inbound peer messages to the engines.

use async_trait::async_trait;
use murmur_consensus::{ConsensusEngine, ConsensusError, WriteStatus};
use murmur_p2p::{GossipEngine, Message, MessageHandler, MessageLimits, P2pError, Result};
use murmur_types::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::observability::{Direction, MetricsState};

/// Validates each decoded message and hands it to the gossip or consensus
/// engine. An invalid message is an error, which closes its connection.
///
/// Snapshot pages are cut to fit `max_frame_bytes` and the snapshot entry
/// limit, so any store can be served whatever its size.
pub struct Dispatcher {
    gossip: Arc<GossipEngine>,
    consensus: Arc<ConsensusEngine>,
    limits: MessageLimits,
    max_frame_bytes: usize,
    metrics: MetricsState,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        gossip: Arc<GossipEngine>,
        consensus: Arc<ConsensusEngine>,
        limits: MessageLimits,
        max_frame_bytes: usize,
        metrics: MetricsState,
    ) -> Self {
        Self {
            gossip,
            consensus,
            limits,
            max_frame_bytes,
            metrics,
        }
    }

    /// Validates and routes one message, returning the reply if any.
    pub fn dispatch(&self, message: Message) -> Result<Option<Message>> {
        if let Err(e) = message.validate(&self.limits) {
            self.metrics.record_invalid_message();
            return Err(e);
        }
        self.metrics
            .record_message(message.kind().as_str(), Direction::Received);

        match message {
            Message::GossipPush { sender, sample } => {
                self.gossip.handle_push(&sender, &sample);
                Ok(None)
            }
            Message::GossipPullRequest { sender } => {
                Ok(Some(self.gossip.handle_pull_request(&sender)))
            }
            Message::GossipPullResponse { sample } => {
                self.gossip.handle_pull_response(&sample);
                Ok(None)
            }
            Message::WritePropose(entry) => self.handle_propose(entry).map(Some),
            Message::WriteAccept(entry) => {
                self.consensus
                    .apply_replicated(entry)
                    .map_err(consensus_error)?;
                Ok(None)
            }
            Message::SnapshotRequest { after } => {
                let sorted = self.consensus.snapshot().map_err(consensus_error)?;
                let page = Message::snapshot_page(
                    &sorted,
                    after.as_deref(),
                    self.max_frame_bytes,
                    self.limits.max_snapshot_entries,
                );
                if let Message::SnapshotResponse { entries, more } = &page {
                    debug!(after = ?after, entries = entries.len(), more, "Serving snapshot page");
                }
                Ok(Some(page))
            }
            Message::SnapshotResponse { entries, .. } => {
                let report = self
                    .consensus
                    .apply_snapshot(entries)
                    .map_err(consensus_error)?;
                info!(applied = report.applied, "Applied unsolicited snapshot");
                Ok(None)
            }
        }
    }

    /// Decides a peer's proposal. The reply carries the proposal itself when
    /// accepted and the stored winner otherwise.
    fn handle_propose(&self, entry: Entry) -> Result<Message> {
        let record = self
            .consensus
            .propose_record(entry)
            .map_err(consensus_error)?;

        match record.status {
            WriteStatus::Accepted => Ok(Message::WriteAccept(record.entry)),
            _ => {
                let winner = self
                    .consensus
                    .get(&record.entry.key)
                    .map_err(consensus_error)?
                    .unwrap_or(record.entry);
                Ok(Message::WriteAccept(winner))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, remote: SocketAddr, message: Message) -> Result<Option<Message>> {
        let kind = message.kind();
        self.dispatch(message).inspect_err(|e| {
            if e.is_malformed() {
                warn!(remote = %remote, kind = kind.as_str(), error = %e, "Dropping invalid message");
            }
        })
    }
}

fn consensus_error(e: ConsensusError) -> P2pError {
    match e {
        ConsensusError::InvalidWrite(reason) => P2pError::InvalidMessage(reason),
        other => P2pError::Io(std::io::Error::other(other.to_string())),
    }
}
