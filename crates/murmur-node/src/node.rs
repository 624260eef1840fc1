//! Node composition.
//!
//! A [`Node`] owns one instance of every component and hands an `Arc` of
//! itself to each task it spawns. Nothing is global, so several nodes can
//! run in one process.

use murmur_consensus::{
    ConsensusEngine, ConsensusEvent, ReplicatedStore, WriteRecord, WriteStatus,
};
use murmur_p2p::{
    GossipEngine, Listener, Message, MessageKind, MessageLimits, P2pError, PeerRecord,
    PeerRegistry, PruningEngine, Transport,
};
use murmur_types::{Entry, LogicalTimestamp, PeerAddr, Value};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::anti_entropy::AntiEntropyEngine;
use crate::bootstrap::{BootstrapEngine, BootstrapOutcome};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{NodeError, Result};
use crate::observability::MetricsState;
use crate::replication::PeerReplicator;
use crate::sync::SnapshotPuller;
use crate::{control, health};

/// A running Murmur node.
pub struct Node {
    identity: PeerAddr,
    config: Config,
    limits: MessageLimits,
    registry: Arc<PeerRegistry>,
    transport: Transport,
    gossip: Arc<GossipEngine>,
    pruning: Arc<PruningEngine>,
    consensus: Arc<ConsensusEngine>,
    anti_entropy: Arc<AntiEntropyEngine>,
    dispatcher: Arc<Dispatcher>,
    metrics: MetricsState,
    listener: Mutex<Option<Listener>>,
    listen_addr: SocketAddr,
    bootstrap: OnceCell<BootstrapOutcome>,
    ready: Notify,
    started_at: Instant,
}

impl Node {
    /// Validates `config`, binds the peer listener and wires the components.
    ///
    /// The node's identity is the advertised host plus the bound port, so a
    /// listen port of 0 is allowed.
    pub async fn bind(config: Config) -> Result<Arc<Self>> {
        config.check()?;

        let metrics = MetricsState::new();
        let transport_config = config.transport.to_transport();
        let listener = Listener::bind(config.listen, transport_config)
            .await
            .map_err(|e| match e {
                P2pError::Io(source) => NodeError::Bind {
                    addr: config.listen,
                    source,
                },
                other => other.into(),
            })?
            .with_observer(Arc::new(metrics.clone()));
        let listen_addr = listener.local_addr()?;
        let identity = config.identity(listen_addr.port());

        let limits = config.limits.to_limits();
        let registry = Arc::new(PeerRegistry::new(identity.clone()));
        let transport = Transport::new(transport_config).with_observer(Arc::new(metrics.clone()));

        let gossip = Arc::new(GossipEngine::new(
            registry.clone(),
            transport.clone(),
            config.gossip.to_engine(),
            config.seeds.clone(),
        ));
        let pruning = Arc::new(PruningEngine::new(
            registry.clone(),
            config.pruning.to_engine(),
        ));

        let replicator = Arc::new(PeerReplicator::new(registry.clone(), transport.clone()));
        let consensus = Arc::new(
            ConsensusEngine::new(identity.clone(), ReplicatedStore::in_memory())
                .with_replication(replicator),
        );
        let anti_entropy = Arc::new(AntiEntropyEngine::new(
            registry.clone(),
            SnapshotPuller::new(transport.clone(), consensus.clone(), limits),
            config.anti_entropy.to_engine(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            gossip.clone(),
            consensus.clone(),
            limits,
            transport_config.max_frame_bytes,
            metrics.clone(),
        ));

        info!(identity = %identity, listen = %listen_addr, "Node bound");

        Ok(Arc::new(Self {
            identity,
            config,
            limits,
            registry,
            transport,
            gossip,
            pruning,
            consensus,
            anti_entropy,
            dispatcher,
            metrics,
            listener: Mutex::new(Some(listener)),
            listen_addr,
            bootstrap: OnceCell::new(),
            ready: Notify::new(),
            started_at: Instant::now(),
        }))
    }

    /// Binds the optional control and health listeners and spawns every task.
    ///
    /// Dropping the returned handle stops the node.
    pub async fn start(self: &Arc<Self>) -> Result<NodeHandle> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let control_listener = match self.config.control {
            Some(addr) => Some(control::bind(addr).await?),
            None => None,
        };
        let health_listener = match self.config.health {
            Some(addr) => Some(health::bind(addr).await?),
            None => None,
        };

        let mut handle = NodeHandle {
            tasks: Vec::new(),
            control_addr: None,
            health_addr: None,
        };

        let dispatcher = self.dispatcher.clone();
        handle.tasks.push(tokio::spawn(async move {
            if let Err(e) = listener.serve(dispatcher).await {
                warn!(error = %e, "Peer listener stopped");
            }
        }));

        handle.tasks.push(tokio::spawn(self.gossip.clone().run()));
        handle.tasks.push(tokio::spawn(self.pruning.clone().run()));
        handle.tasks.push(tokio::spawn(self.anti_entropy.clone().run()));
        handle.tasks.push(tokio::spawn(record_write_events(
            self.consensus.subscribe(),
            self.metrics.clone(),
        )));

        let node = self.clone();
        handle.tasks.push(tokio::spawn(async move {
            node.run_bootstrap().await;
        }));

        if let Some(listener) = control_listener {
            handle.control_addr = Some(listener.local_addr()?);
            let node = self.clone();
            handle.tasks.push(tokio::spawn(async move {
                control::serve(listener, node).await;
            }));
        }

        if let Some(listener) = health_listener {
            handle.health_addr = Some(listener.local_addr()?);
            let node = self.clone();
            handle.tasks.push(tokio::spawn(async move {
                if let Err(e) = health::serve(listener, node).await {
                    warn!(error = %e, "Health server stopped");
                }
            }));
        }

        info!(
            identity = %self.identity,
            seeds = self.config.seeds.len(),
            control = ?handle.control_addr,
            health = ?handle.health_addr,
            "Node started"
        );
        Ok(handle)
    }

    async fn run_bootstrap(&self) {
        let engine = BootstrapEngine::new(
            self.registry.clone(),
            SnapshotPuller::new(self.transport.clone(), self.consensus.clone(), self.limits),
            self.config.bootstrap.to_engine(),
            !self.config.seeds.is_empty(),
        );

        let outcome = engine.run().await;
        info!(outcome = %outcome, "Node ready");
        if self.bootstrap.set(outcome).is_err() {
            warn!("Bootstrap outcome already recorded");
        }
        self.ready.notify_waiters();
    }

    /// Returns this node's identity.
    pub fn identity(&self) -> &PeerAddr {
        &self.identity
    }

    /// Returns the bound peer listener address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Returns the configuration the node was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the peer registry.
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Returns the consensus engine.
    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    /// Returns the node metrics.
    pub fn metrics(&self) -> &MetricsState {
        &self.metrics
    }

    /// Time since the node was bound.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns true once bootstrap has finished, whatever its outcome.
    pub fn is_ready(&self) -> bool {
        self.bootstrap.get().is_some()
    }

    /// Returns the bootstrap outcome once known.
    pub fn bootstrap_outcome(&self) -> Option<&BootstrapOutcome> {
        self.bootstrap.get()
    }

    /// Waits up to `timeout` for the node to become ready.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let notified = self.ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_ready() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_ready()
    }

    /// Reads a key. Deleted keys read as `None`.
    pub fn local_get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.consensus.get_value(key)?)
    }

    /// Writes a key through this node.
    pub fn local_propose(&self, key: &str, value: impl Into<Value>) -> Result<WriteRecord> {
        let value = value.into();
        self.check_local_write(key, &value)?;
        Ok(self.consensus.propose(key, value)?)
    }

    /// Deletes a key through this node.
    pub fn local_delete(&self, key: &str) -> Result<WriteRecord> {
        self.check_local_write(key, &Value::Tombstone)?;
        Ok(self.consensus.delete(key)?)
    }

    /// Returns every known peer.
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.registry.list()
    }

    /// Returns every stored entry, tombstones included, sorted by key.
    pub fn dump(&self) -> Result<Vec<Entry>> {
        Ok(self.consensus.snapshot()?)
    }

    /// Asks `peer` to decide a write stamped by this node.
    ///
    /// The peer's decision is applied locally either way: its winning entry
    /// is a write it accepted at some point.
    pub async fn propose_via(
        &self,
        peer: &PeerAddr,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<WriteStatus> {
        let value = value.into();
        self.check_local_write(key, &value)?;

        let timestamp = LogicalTimestamp::new(
            self.consensus.clock().tick(),
            self.identity.clone(),
        );
        let proposal = Entry::new(key, value, timestamp);

        let reply = self
            .transport
            .request_kind(
                peer,
                &Message::WritePropose(proposal.clone()),
                MessageKind::WriteAccept,
            )
            .await?;
        reply.validate(&self.limits)?;
        self.registry.touch(peer);

        let decided = match reply {
            Message::WriteAccept(entry) => entry,
            other => {
                return Err(P2pError::UnexpectedResponse {
                    expected: MessageKind::WriteAccept,
                    actual: other.kind(),
                }
                .into())
            }
        };

        let status = if decided == proposal {
            WriteStatus::Accepted
        } else {
            WriteStatus::Rejected
        };
        debug!(peer = %peer, key = %key, status = %status, "Remote proposal decided");

        self.consensus.apply_replicated(decided)?;
        Ok(status)
    }

    /// Encodes metrics after refreshing the size gauges.
    pub fn encode_metrics(&self) -> std::result::Result<String, std::fmt::Error> {
        self.metrics.set_sizes(
            self.registry.len(),
            self.registry.alive_count(),
            self.consensus.len().unwrap_or(0),
        );
        self.metrics.encode()
    }

    fn check_local_write(&self, key: &str, value: &Value) -> Result<()> {
        let invalid = |reason: String| {
            NodeError::Consensus(murmur_consensus::ConsensusError::InvalidWrite(reason))
        };
        if key.is_empty() {
            return Err(invalid("empty key".into()));
        }
        if key.len() > self.limits.max_key_bytes {
            return Err(invalid(format!(
                "key of {} bytes exceeds limit of {}",
                key.len(),
                self.limits.max_key_bytes
            )));
        }
        if value.len() > self.limits.max_value_bytes {
            return Err(invalid(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                self.limits.max_value_bytes
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity)
            .field("listen_addr", &self.listen_addr)
            .field("ready", &self.is_ready())
            .finish()
    }
}

async fn record_write_events(
    mut events: broadcast::Receiver<ConsensusEvent>,
    metrics: MetricsState,
) {
    loop {
        match events.recv().await {
            Ok(ConsensusEvent::WriteAccepted { source, .. }) => {
                metrics.record_write("accepted", source.as_str());
            }
            Ok(ConsensusEvent::WriteRejected { source, .. }) => {
                metrics.record_write("rejected", source.as_str());
            }
            Ok(ConsensusEvent::SnapshotApplied(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Write metrics lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Tasks of a started node.
///
/// Dropping the handle aborts every task.
#[derive(Debug)]
pub struct NodeHandle {
    tasks: Vec<JoinHandle<()>>,
    control_addr: Option<SocketAddr>,
    health_addr: Option<SocketAddr>,
}

impl NodeHandle {
    /// Bound control shell address, if enabled.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    /// Bound health server address, if enabled.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// Stops every task.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
