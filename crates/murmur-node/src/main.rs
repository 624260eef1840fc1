//! Murmur Node - gossiping replicated key-value store.
//!
//! This is the main entry point for running a Murmur node.

use anyhow::Context;
use clap::Parser;
use murmur_node::{init_logging, Config, LogFormat, Node};
use murmur_types::PeerAddr;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Murmur Node - gossiping replicated key-value store
#[derive(Parser, Debug)]
#[command(name = "murmur-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer protocol listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Host other peers use to reach this node
    #[arg(long)]
    advertise_host: Option<String>,

    /// Seed peer (host:port), may be repeated
    #[arg(long = "seed")]
    seeds: Vec<PeerAddr>,

    /// Control shell listen address
    #[arg(long)]
    control: Option<SocketAddr>,

    /// Health and metrics HTTP listen address
    #[arg(long)]
    health: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(host) = self.advertise_host {
            config.advertise_host = host;
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds;
        }
        if self.control.is_some() {
            config.control = self.control;
        }
        if self.health.is_some() {
            config.health = self.health;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Murmur node");

    let node = Node::bind(config).await.context("failed to bind node")?;
    let handle = node.start().await.context("failed to start node")?;

    tracing::info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    handle.shutdown();
    Ok(())
}
