//! Prometheus metrics collection.

use murmur_p2p::{MessageKind, TrafficObserver};
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Message direction.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    /// Received from a peer.
    Received,
    /// Sent to a peer.
    Sent,
}

/// P2P message labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MessageLabels {
    /// Message kind
    pub kind: String,
    /// Direction (sent/received)
    pub direction: Direction,
}

/// Write outcome labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteLabels {
    /// accepted or rejected
    pub outcome: String,
    /// Where the write came from
    pub source: String,
}

/// Metrics for one node.
#[derive(Clone)]
pub struct MetricsState {
    registry: Arc<RwLock<Registry>>,
    /// Messages by kind and direction.
    pub messages_total: Family<MessageLabels, Counter>,
    /// Messages dropped because they failed to decode or validate.
    pub invalid_messages_total: Counter,
    /// Writes by outcome and source.
    pub writes_total: Family<WriteLabels, Counter>,
    /// Known peers.
    pub peers_known: Gauge,
    /// Alive peers.
    pub peers_alive: Gauge,
    /// Keys in the store, tombstones included.
    pub store_keys: Gauge,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsState").finish_non_exhaustive()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("murmur");

        let messages_total = Family::<MessageLabels, Counter>::default();
        registry.register(
            "p2p_messages",
            "Peer messages by kind and direction",
            messages_total.clone(),
        );

        let invalid_messages_total = Counter::default();
        registry.register(
            "p2p_invalid_messages",
            "Peer messages dropped as malformed",
            invalid_messages_total.clone(),
        );

        let writes_total = Family::<WriteLabels, Counter>::default();
        registry.register(
            "writes",
            "Writes decided by outcome and source",
            writes_total.clone(),
        );

        let peers_known = Gauge::default();
        registry.register("peers_known", "Peers in the registry", peers_known.clone());

        let peers_alive = Gauge::default();
        registry.register("peers_alive", "Peers currently alive", peers_alive.clone());

        let store_keys = Gauge::default();
        registry.register("store_keys", "Keys in the store", store_keys.clone());

        Self {
            registry: Arc::new(RwLock::new(registry)),
            messages_total,
            invalid_messages_total,
            writes_total,
            peers_known,
            peers_alive,
            store_keys,
        }
    }

    /// Record a peer message.
    pub fn record_message(&self, kind: &str, direction: Direction) {
        self.messages_total
            .get_or_create(&MessageLabels {
                kind: kind.to_string(),
                direction,
            })
            .inc();
    }

    /// Record a message dropped as malformed.
    pub fn record_invalid_message(&self) {
        self.invalid_messages_total.inc();
    }

    /// Record a decided write.
    pub fn record_write(&self, outcome: &str, source: &str) {
        self.writes_total
            .get_or_create(&WriteLabels {
                outcome: outcome.to_string(),
                source: source.to_string(),
            })
            .inc();
    }

    /// Update the size gauges.
    pub fn set_sizes(&self, known: usize, alive: usize, keys: usize) {
        self.peers_known.set(known as i64);
        self.peers_alive.set(alive as i64);
        self.store_keys.set(keys as i64);
    }

    /// Encode metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

impl TrafficObserver for MetricsState {
    fn sent(&self, kind: MessageKind) {
        self.record_message(kind.as_str(), Direction::Sent);
    }

    fn rejected(&self) {
        self.record_invalid_message();
    }
}
