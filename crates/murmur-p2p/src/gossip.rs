//! Peer discovery through periodic gossip.
//!
//! Every tick the engine pushes a random sample of its registry to a few
//! alive peers. While it knows fewer alive peers than `min_peers` it also
//! pulls samples from every known peer and every seed.

use futures::future::join_all;
use murmur_types::PeerAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::{Message, MessageKind, PeerRegistry, PeerSample, Result, Transport};

/// Gossip configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipConfig {
    /// Time between gossip rounds.
    pub interval: Duration,
    /// Peers pushed to per round.
    pub fanout: usize,
    /// Maximum peers advertised in one sample.
    pub sample_size: usize,
    /// Pull from everyone while fewer alive peers than this are known.
    pub min_peers: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            fanout: 3,
            sample_size: 16,
            min_peers: 3,
        }
    }
}

/// Outcome of one gossip round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipRound {
    /// Pull requests that got a response.
    pub pulled: usize,
    /// Pushes delivered.
    pub pushed: usize,
    /// Exchanges that failed.
    pub failed: usize,
    /// Peers learned this round.
    pub discovered: usize,
}

/// Runs gossip rounds and applies incoming gossip to the registry.
pub struct GossipEngine {
    registry: Arc<PeerRegistry>,
    transport: Transport,
    config: GossipConfig,
    seeds: Vec<PeerAddr>,
}

impl GossipEngine {
    /// Creates a gossip engine.
    ///
    /// `seeds` are contacted with pull requests whenever the registry is
    /// below `min_peers`, whether or not they are currently known.
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Transport,
        config: GossipConfig,
        seeds: Vec<PeerAddr>,
    ) -> Self {
        let local = registry.local().clone();
        let mut seeds: Vec<PeerAddr> = seeds.into_iter().filter(|s| *s != local).collect();
        seeds.sort();
        seeds.dedup();

        Self {
            registry,
            transport,
            config,
            seeds,
        }
    }

    /// Returns the configured seeds.
    #[must_use]
    pub fn seeds(&self) -> &[PeerAddr] {
        &self.seeds
    }

    /// Returns the gossip configuration.
    #[must_use]
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Runs gossip rounds forever.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            fanout = self.config.fanout,
            seeds = self.seeds.len(),
            "Gossip engine started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let round = self.tick().await;
            trace!(?round, peers = self.registry.len(), "Gossip round finished");
        }
    }

    /// Runs a single gossip round.
    pub async fn tick(&self) -> GossipRound {
        let mut round = GossipRound::default();

        if self.registry.alive_count() < self.config.min_peers {
            self.pull(&mut round).await;
        }
        self.push(&mut round).await;

        if round.discovered > 0 {
            debug!(
                discovered = round.discovered,
                peers = self.registry.len(),
                "Gossip discovered peers"
            );
        }
        round
    }

    async fn pull(&self, round: &mut GossipRound) {
        let mut targets: Vec<PeerAddr> = self
            .registry
            .list()
            .into_iter()
            .map(|record| record.addr)
            .chain(self.seeds.iter().cloned())
            .collect();
        targets.sort();
        targets.dedup();

        if targets.is_empty() {
            return;
        }

        let request = Message::GossipPullRequest {
            sender: self.registry.local().clone(),
        };
        let request = &request;
        let exchanges = targets.iter().map(|peer| async move {
            let result = self
                .transport
                .request_kind(peer, request, MessageKind::GossipPullResponse)
                .await;
            (peer, result)
        });

        for (peer, result) in join_all(exchanges).await {
            match result {
                Ok(Message::GossipPullResponse { sample }) => {
                    self.registry.touch(peer);
                    round.pulled += 1;
                    round.discovered += self.handle_pull_response(&sample);
                }
                Ok(other) => {
                    debug!(peer = %peer, kind = other.kind().as_str(), "Ignoring unexpected gossip reply");
                    round.failed += 1;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Gossip pull failed");
                    self.registry.mark_suspect(peer);
                    round.failed += 1;
                }
            }
        }
    }

    async fn push(&self, round: &mut GossipRound) {
        let targets = self.registry.choose_alive(self.config.fanout);
        if targets.is_empty() {
            return;
        }

        let local = self.registry.local().clone();
        let exchanges = targets.iter().map(|peer| {
            let message = Message::GossipPush {
                sender: local.clone(),
                sample: self.registry.sample(self.config.sample_size, Some(peer)),
            };
            async move {
                let result: Result<()> = self.transport.send(peer, &message).await;
                (peer, result)
            }
        });

        for (peer, result) in join_all(exchanges).await {
            match result {
                Ok(()) => {
                    self.registry.touch(peer);
                    round.pushed += 1;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Gossip push failed, marking peer suspect");
                    self.registry.mark_suspect(peer);
                    round.failed += 1;
                }
            }
        }
    }

    /// Applies a received push. Returns the number of peers learned.
    pub fn handle_push(&self, sender: &PeerAddr, sample: &[PeerSample]) -> usize {
        let mut discovered = usize::from(self.registry.touch(sender));
        discovered += self.registry.merge_sample(sample);
        trace!(peer = %sender, advertised = sample.len(), discovered, "Received gossip push");
        discovered
    }

    /// Answers a pull request with a sample of known peers.
    pub fn handle_pull_request(&self, sender: &PeerAddr) -> Message {
        self.registry.touch(sender);
        let sample = self.registry.sample(self.config.sample_size, Some(sender));
        trace!(peer = %sender, sample = sample.len(), "Answering gossip pull");
        Message::GossipPullResponse { sample }
    }

    /// Applies a pull response. Returns the number of peers learned.
    pub fn handle_pull_response(&self, sample: &[PeerSample]) -> usize {
        self.registry.merge_sample(sample)
    }
}

impl std::fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipEngine")
            .field("local", self.registry.local())
            .field("config", &self.config)
            .field("seeds", &self.seeds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Listener, MessageHandler, P2pError, PeerState, TransportConfig};
    use async_trait::async_trait;
    use murmur_types::Timestamp;
    use std::net::SocketAddr;

    struct GossipOnly(Arc<GossipEngine>);

    #[async_trait]
    impl MessageHandler for GossipOnly {
        async fn handle(&self, _remote: SocketAddr, message: Message) -> Result<Option<Message>> {
            match message {
                Message::GossipPush { sender, sample } => {
                    self.0.handle_push(&sender, &sample);
                    Ok(None)
                }
                Message::GossipPullRequest { sender } => {
                    Ok(Some(self.0.handle_pull_request(&sender)))
                }
                Message::GossipPullResponse { sample } => {
                    self.0.handle_pull_response(&sample);
                    Ok(None)
                }
                other => Err(P2pError::InvalidMessage(format!(
                    "unexpected {}",
                    other.kind().as_str()
                ))),
            }
        }
    }

    fn addr(port: u16) -> PeerAddr {
        PeerAddr::new("127.0.0.1", port)
    }

    fn fast_transport() -> Transport {
        Transport::new(TransportConfig {
            connect_timeout: Duration::from_millis(200),
            io_timeout: Duration::from_millis(500),
            ..TransportConfig::default()
        })
    }

    /// Starts a gossiping node on an ephemeral port.
    async fn spawn_node(seeds: Vec<PeerAddr>) -> Arc<GossipEngine> {
        let listener = Listener::bind("127.0.0.1:0", TransportConfig::default())
            .await
            .unwrap();
        let local = PeerAddr::from(listener.local_addr().unwrap());
        let registry = Arc::new(PeerRegistry::new(local));
        let engine = Arc::new(GossipEngine::new(
            registry,
            fast_transport(),
            GossipConfig::default(),
            seeds,
        ));
        tokio::spawn(listener.serve(Arc::new(GossipOnly(engine.clone()))));
        engine
    }

    fn engine_for(local: PeerAddr) -> GossipEngine {
        GossipEngine::new(
            Arc::new(PeerRegistry::new(local)),
            fast_transport(),
            GossipConfig::default(),
            vec![],
        )
    }

    #[test]
    fn test_handle_push_touches_sender_and_merges() {
        let engine = engine_for(addr(1));
        let sample = vec![
            PeerSample::new(addr(3), Timestamp::from_millis(10)),
            PeerSample::new(addr(1), Timestamp::from_millis(10)),
        ];

        assert_eq!(engine.handle_push(&addr(2), &sample), 2);
        assert_eq!(engine.registry.len(), 2);
        assert!(engine.registry.get(&addr(1)).is_none());
    }

    #[test]
    fn test_pull_request_excludes_requester() {
        let engine = engine_for(addr(1));
        engine.registry.touch(&addr(3));

        match engine.handle_pull_request(&addr(2)) {
            Message::GossipPullResponse { sample } => {
                assert_eq!(sample.len(), 1);
                assert_eq!(sample[0].addr, addr(3));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(engine.registry.get(&addr(2)).is_some());
    }

    #[test]
    fn test_seeds_exclude_local_identity() {
        let engine = GossipEngine::new(
            Arc::new(PeerRegistry::new(addr(1))),
            fast_transport(),
            GossipConfig::default(),
            vec![addr(2), addr(1), addr(2)],
        );
        assert_eq!(engine.seeds(), &[addr(2)]);
    }

    #[tokio::test]
    async fn test_empty_round_is_noop() {
        let engine = engine_for(addr(1));
        assert_eq!(engine.tick().await, GossipRound::default());
    }

    #[tokio::test]
    async fn test_pull_from_seed_discovers_cluster() {
        let seed = spawn_node(vec![]).await;
        let other = spawn_node(vec![]).await;
        seed.registry.touch(other.registry.local());

        let joiner = spawn_node(vec![seed.registry.local().clone()]).await;
        let round = joiner.tick().await;

        assert_eq!(round.pulled, 1);
        assert!(joiner.registry.get(seed.registry.local()).is_some());
        assert!(joiner.registry.get(other.registry.local()).is_some());
        // The seed learned about the joiner from its pull request
        assert!(seed.registry.get(joiner.registry.local()).is_some());
    }

    #[tokio::test]
    async fn test_push_spreads_membership() {
        let a = spawn_node(vec![]).await;
        let b = spawn_node(vec![]).await;
        let c = spawn_node(vec![]).await;
        a.registry.touch(b.registry.local());
        a.registry.touch(c.registry.local());

        a.tick().await;

        for _ in 0..50 {
            if b.registry.len() == 2 && c.registry.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(b.registry.get(c.registry.local()).is_some());
        assert!(c.registry.get(b.registry.local()).is_some());
    }

    #[tokio::test]
    async fn test_failed_push_marks_suspect() {
        let engine = engine_for(addr(1));
        let unreachable = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            PeerAddr::from(listener.local_addr().unwrap())
        };
        engine.registry.touch(&unreachable);

        let round = engine.tick().await;

        assert!(round.failed >= 1);
        assert_eq!(
            engine.registry.get(&unreachable).unwrap().state,
            PeerState::Suspect
        );
    }
}
