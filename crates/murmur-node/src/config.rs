//! Node configuration.
//!
//! Configuration is read from a YAML file, then individual fields can be
//! overridden from the command line. Every section has defaults, so an empty
//! file is a valid single-node configuration. Durations are milliseconds.
//!
//! ```yaml
//! listen: 0.0.0.0:8411
//! advertise_host: 10.0.0.5
//! seeds: ["10.0.0.1:8411", "10.0.0.2:8411"]
//! control: 127.0.0.1:8412
//! gossip:
//!   interval_ms: 1000
//!   fanout: 3
//! pruning:
//!   liveness_deadline_ms: 10000
//!   grace_window_ms: 20000
//! anti_entropy:
//!   interval_ms: 5000
//! ```

use murmur_p2p::message::SNAPSHOT_PAGE_OVERHEAD;
use murmur_p2p::{GossipConfig, MessageLimits, PruningConfig, TransportConfig};
use murmur_types::PeerAddr;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::anti_entropy::AntiEntropyConfig;
use crate::bootstrap::BootstrapConfig;
use crate::error::{NodeError, Result};
use crate::resilience::RetryPolicy;

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
#[validate(schema(function = "validate_cross_fields"))]
pub struct Config {
    /// Peer protocol listen address.
    pub listen: SocketAddr,
    /// Host other peers should use to reach this node.
    #[validate(length(min = 1, max = 255))]
    pub advertise_host: String,
    /// Well-known peers used to join the cluster.
    pub seeds: Vec<PeerAddr>,
    /// Control shell listen address, if enabled.
    pub control: Option<SocketAddr>,
    /// Health and metrics HTTP listen address, if enabled.
    pub health: Option<SocketAddr>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (pretty or json).
    pub log_format: String,
    /// Gossip settings.
    #[validate(nested)]
    pub gossip: GossipSection,
    /// Pruning settings.
    #[validate(nested)]
    pub pruning: PruningSection,
    /// Bootstrap settings.
    #[validate(nested)]
    pub bootstrap: BootstrapSection,
    /// Anti-entropy settings.
    #[validate(nested)]
    pub anti_entropy: AntiEntropySection,
    /// Connection settings.
    #[validate(nested)]
    pub transport: TransportSection,
    /// Message limits.
    #[validate(nested)]
    pub limits: LimitsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], murmur_p2p::DEFAULT_PORT)),
            advertise_host: "127.0.0.1".to_string(),
            seeds: Vec::new(),
            control: None,
            health: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            gossip: GossipSection::default(),
            pruning: PruningSection::default(),
            bootstrap: BootstrapSection::default(),
            anti_entropy: AntiEntropySection::default(),
            transport: TransportSection::default(),
            limits: LimitsSection::default(),
        }
    }
}

/// Gossip section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct GossipSection {
    /// Time between gossip rounds.
    #[validate(range(min = 10, max = 600_000))]
    pub interval_ms: u64,
    /// Peers pushed to per round.
    #[validate(range(min = 1, max = 64))]
    pub fanout: usize,
    /// Maximum peers advertised per message.
    #[validate(range(min = 1, max = 4096))]
    pub sample_size: usize,
    /// Pull from every known peer while fewer alive peers are known.
    #[validate(range(max = 1024))]
    pub min_peers: usize,
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            fanout: 3,
            sample_size: 16,
            min_peers: 3,
        }
    }
}

impl GossipSection {
    /// Converts to the engine configuration.
    #[must_use]
    pub fn to_engine(&self) -> GossipConfig {
        GossipConfig {
            interval: Duration::from_millis(self.interval_ms),
            fanout: self.fanout,
            sample_size: self.sample_size,
            min_peers: self.min_peers,
        }
    }
}

/// Pruning section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct PruningSection {
    /// Time between pruning passes.
    #[validate(range(min = 10, max = 600_000))]
    pub interval_ms: u64,
    /// Silence after which a peer is suspect.
    #[validate(range(min = 1))]
    pub liveness_deadline_ms: u64,
    /// Further silence after which a suspect peer is removed.
    #[validate(range(min = 1))]
    pub grace_window_ms: u64,
}

impl Default for PruningSection {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            liveness_deadline_ms: 10_000,
            grace_window_ms: 20_000,
        }
    }
}

impl PruningSection {
    /// Converts to the engine configuration.
    #[must_use]
    pub fn to_engine(&self) -> PruningConfig {
        PruningConfig {
            interval: Duration::from_millis(self.interval_ms),
            liveness_deadline: Duration::from_millis(self.liveness_deadline_ms),
            grace_window: Duration::from_millis(self.grace_window_ms),
        }
    }
}

/// Bootstrap section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapSection {
    /// Snapshot attempts before giving up.
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: u32,
    /// How long one attempt waits for an alive peer.
    #[validate(range(min = 1))]
    pub peer_wait_ms: u64,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    pub max_backoff_ms: u64,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            peer_wait_ms: 3_000,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl BootstrapSection {
    /// Converts to the engine configuration.
    #[must_use]
    pub fn to_engine(&self) -> BootstrapConfig {
        BootstrapConfig {
            peer_wait: Duration::from_millis(self.peer_wait_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.initial_backoff_ms),
                max_delay: Duration::from_millis(self.max_backoff_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

/// Anti-entropy section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AntiEntropySection {
    /// Time between store repair rounds.
    #[validate(range(min = 10, max = 3_600_000))]
    pub interval_ms: u64,
}

impl Default for AntiEntropySection {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl AntiEntropySection {
    /// Converts to the engine configuration.
    #[must_use]
    pub fn to_engine(&self) -> AntiEntropyConfig {
        AntiEntropyConfig {
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// Transport section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSection {
    /// Connect timeout.
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
    /// Timeout for one exchange once connected.
    #[validate(range(min = 1))]
    pub io_timeout_ms: u64,
    /// Maximum frame size.
    #[validate(range(min = 1024, max = 268_435_456))]
    pub max_frame_bytes: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            io_timeout_ms: 5_000,
            max_frame_bytes: murmur_p2p::MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportSection {
    /// Converts to the transport configuration.
    #[must_use]
    pub fn to_transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

/// Limits section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    /// Maximum key length in bytes.
    #[validate(range(min = 1, max = 65_535))]
    pub max_key_bytes: usize,
    /// Maximum value length in bytes.
    #[validate(range(min = 1))]
    pub max_value_bytes: usize,
    /// Maximum peers accepted in one gossip sample.
    #[validate(range(min = 1))]
    pub max_peer_sample: usize,
    /// Maximum entries in one snapshot page.
    #[validate(range(min = 1))]
    pub max_snapshot_entries: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = MessageLimits::default();
        Self {
            max_key_bytes: limits.max_key_bytes,
            max_value_bytes: limits.max_value_bytes,
            max_peer_sample: limits.max_peer_sample,
            max_snapshot_entries: limits.max_snapshot_entries,
        }
    }
}

impl LimitsSection {
    /// Converts to message limits.
    #[must_use]
    pub fn to_limits(&self) -> MessageLimits {
        MessageLimits {
            max_key_bytes: self.max_key_bytes,
            max_value_bytes: self.max_value_bytes,
            max_peer_sample: self.max_peer_sample,
            max_snapshot_entries: self.max_snapshot_entries,
        }
    }
}

// Longest host a proposer may advertise.
const MAX_HOST_BYTES: usize = 255;

/// Encoded size of a snapshot page holding one largest possible entry.
fn largest_page(limits: &LimitsSection) -> usize {
    let key = 2 + limits.max_key_bytes;
    let value = 1 + 4 + limits.max_value_bytes;
    let timestamp = 8 + 2 + MAX_HOST_BYTES + 2;
    SNAPSHOT_PAGE_OVERHEAD + key + value + timestamp
}

fn validate_cross_fields(config: &Config) -> std::result::Result<(), ValidationError> {
    if config.pruning.liveness_deadline_ms <= config.gossip.interval_ms {
        return Err(ValidationError::new("liveness_deadline")
            .with_message("pruning.liveness_deadline_ms must exceed gossip.interval_ms".into()));
    }
    if config.gossip.sample_size > config.limits.max_peer_sample {
        return Err(ValidationError::new("sample_size")
            .with_message("gossip.sample_size must not exceed limits.max_peer_sample".into()));
    }
    if config.transport.max_frame_bytes < largest_page(&config.limits) {
        return Err(ValidationError::new("max_frame_bytes").with_message(
            "transport.max_frame_bytes must hold a snapshot page with the largest key and value"
                .into(),
        ));
    }
    if config.bootstrap.max_backoff_ms < config.bootstrap.initial_backoff_ms {
        return Err(ValidationError::new("max_backoff")
            .with_message("bootstrap.max_backoff_ms must be at least initial_backoff_ms".into()));
    }
    Ok(())
}

impl Config {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reads and parses a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    /// Checks every field and the relations between them.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        if self.seeds.iter().any(|seed| seed.port() == 0) {
            return Err(NodeError::Config("seed with port 0".into()));
        }
        Ok(())
    }

    /// Returns the identity this node advertises for a listener bound to `port`.
    #[must_use]
    pub fn identity(&self, port: u16) -> PeerAddr {
        PeerAddr::new(self.advertise_host.clone(), port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().check().unwrap();
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_yaml(
            r#"
listen: 127.0.0.1:9000
seeds: ["10.0.0.1:8411", "node-b:8411"]
gossip:
  fanout: 5
pruning:
  liveness_deadline_ms: 4000
"#,
        )
        .unwrap();

        config.check().unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.seeds[1], PeerAddr::new("node-b", 8411));
        assert_eq!(config.gossip.fanout, 5);
        assert_eq!(config.gossip.interval_ms, 1_000);
        assert_eq!(
            config.pruning.to_engine().liveness_deadline,
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::from_yaml("gossip:\n  fan_out: 2\n"),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn test_bad_seed_rejected() {
        assert!(Config::from_yaml("seeds: [\"no-port\"]").is_err());
    }

    #[test]
    fn test_range_checks() {
        let mut config = Config::default();
        config.gossip.fanout = 0;
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.pruning.grace_window_ms = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_cross_field_checks() {
        let mut config = Config::default();
        config.pruning.liveness_deadline_ms = config.gossip.interval_ms;
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.transport.max_frame_bytes = 4096;
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.gossip.sample_size = config.limits.max_peer_sample + 1;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_small_frames_with_matching_limits() {
        let mut config = Config::default();
        config.transport.max_frame_bytes = 4096;
        config.limits.max_value_bytes = 1024;
        config.check().unwrap();

        // Key and value alone fit, but not with the page and timestamp framing
        config.limits.max_key_bytes = 1024;
        config.limits.max_value_bytes = 4096 - 1024;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_anti_entropy_section() {
        let config = Config::from_yaml("anti_entropy:\n  interval_ms: 250\n").unwrap();
        config.check().unwrap();
        assert_eq!(
            config.anti_entropy.to_engine().interval,
            Duration::from_millis(250)
        );

        let mut config = Config::default();
        config.anti_entropy.interval_ms = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "advertise_host: node-a\ncontrol: 127.0.0.1:7000").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.identity(8411), PeerAddr::new("node-a", 8411));
        assert_eq!(config.control, Some("127.0.0.1:7000".parse().unwrap()));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/murmur.yaml"),
            Err(NodeError::Config(_))
        ));
    }
}
