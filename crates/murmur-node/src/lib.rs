//! # Murmur Node
//!
//! A replicated key-value node. Nodes discover each other by gossip, drop
//! peers that go silent, and keep one last-writer-wins store consistent
//! across the cluster.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Murmur Node                        │
//! ├───────────────────────────────────────────────────────────┤
//! │  control shell (TCP lines)     health + metrics (HTTP)    │
//! │                 │                          │              │
//! │  ┌──────────────▼──────────────────────────▼───────────┐  │
//! │  │                        Node                         │  │
//! │  │  bootstrap ─► consensus engine ─► replicator        │  │
//! │  │  anti-entropy ─► consensus engine                   │  │
//! │  │  dispatcher ─► gossip engine ─► peer registry       │  │
//! │  │                pruning engine ─┘                    │  │
//! │  └─────────────────────────┬───────────────────────────┘  │
//! │                            │                              │
//! │               peer transport (framed TCP)                 │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! murmur-node --listen 0.0.0.0:8411 --control 127.0.0.1:8412
//! murmur-node --listen 0.0.0.0:8421 --seed 127.0.0.1:8411
//! ```
//!
//! ## Modules
//!
//! - [`node`] - Component wiring and the local operations
//! - [`dispatcher`] - Routing of inbound peer messages
//! - [`bootstrap`] - Startup snapshot synchronization
//! - [`anti_entropy`] - Periodic store repair from a random peer
//! - [`sync`] - Paged snapshot transfer shared by both
//! - [`replication`] - Fan-out of accepted writes
//! - [`control`] - Line-oriented control shell
//! - [`health`] - Health check and metrics endpoints
//! - [`config`] - Node configuration
//! - [`observability`] - Structured logging and metrics
//! - [`resilience`] - Retry with backoff
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_node::{Config, Node};
//! use std::time::Duration;
//!
//! # async fn example() -> murmur_node::Result<()> {
//! let node = Node::bind(Config::default()).await?;
//! let _handle = node.start().await?;
//! node.wait_ready(Duration::from_secs(10)).await;
//! node.local_propose("greeting", "hello")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anti_entropy;
pub mod bootstrap;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod node;
pub mod observability;
pub mod replication;
pub mod resilience;
pub mod sync;

pub use anti_entropy::{AntiEntropyConfig, AntiEntropyEngine};
pub use bootstrap::{BootstrapConfig, BootstrapEngine, BootstrapOutcome};
pub use config::Config;
pub use error::{NodeError, Result};
pub use node::{Node, NodeHandle};
pub use observability::{init_logging, LogFormat, MetricsState};
pub use resilience::RetryPolicy;
pub use sync::SnapshotPuller;
