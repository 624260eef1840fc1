//! Line-oriented control shell.
//!
//! One command per line, answered by one or more lines. The shell only
//! translates text into calls on [`Node`]; it has no protocol logic.
//!
//! ```text
//! > set color blue
//! accepted (3, 10.0.0.5:8411)
//! > get color
//! blue
//! > quit
//! bye
//! ```

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};
use crate::node::Node;

const HELP: &[&str] = &[
    "help                 show this message",
    "peers                list known peers",
    "get <key>            read a key",
    "set <key> <value>    write a key",
    "delete <key>         delete a key",
    "dump                 list every stored entry",
    "ready                show bootstrap status",
    "quit                 close the session",
];

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List commands.
    Help,
    /// List known peers.
    Peers,
    /// Read a key.
    Get(String),
    /// Write a key. The value is the rest of the line.
    Set {
        /// Key to write.
        key: String,
        /// Value to write.
        value: String,
    },
    /// Delete a key.
    Delete(String),
    /// List every stored entry.
    Dump,
    /// Show readiness.
    Ready,
    /// Close the session.
    Quit,
    /// A known command with missing arguments.
    Usage(&'static str),
    /// Anything else.
    Unknown(String),
    /// A blank line.
    Empty,
}

impl Command {
    /// Parses one input line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let single = |usage: &'static str, build: fn(String) -> Command| {
            match rest.split_whitespace().next() {
                Some(key) => build(key.to_string()),
                None => Command::Usage(usage),
            }
        };

        match name {
            "" => Command::Empty,
            "help" => Command::Help,
            "peers" => Command::Peers,
            "dump" => Command::Dump,
            "ready" => Command::Ready,
            "quit" | "exit" => Command::Quit,
            "get" => single("usage: get <key>", Command::Get),
            "delete" => single("usage: delete <key>", Command::Delete),
            "set" => match rest.split_once(char::is_whitespace) {
                Some((key, value)) => Command::Set {
                    key: key.to_string(),
                    value: value.trim_start().to_string(),
                },
                None => Command::Usage("usage: set <key> <value>"),
            },
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Runs a command against `node` and returns the response lines.
pub fn execute(node: &Node, command: &Command) -> Vec<String> {
    match command {
        Command::Help => HELP.iter().map(|line| line.to_string()).collect(),
        Command::Peers => {
            let peers = node.list_peers();
            if peers.is_empty() {
                return vec!["no peers".to_string()];
            }
            peers
                .iter()
                .map(|peer| format!("{} {} {}", peer.addr, peer.state, peer.last_seen))
                .collect()
        }
        Command::Get(key) => match node.local_get(key) {
            Ok(Some(value)) => vec![value.to_string()],
            Ok(None) => vec!["(nil)".to_string()],
            Err(e) => vec![format!("error: {}", e)],
        },
        Command::Set { key, value } => match node.local_propose(key, value.as_str()) {
            Ok(record) => vec![format!("{} {}", record.status, record.entry.timestamp)],
            Err(e) => vec![format!("error: {}", e)],
        },
        Command::Delete(key) => match node.local_delete(key) {
            Ok(record) => vec![format!("{} {}", record.status, record.entry.timestamp)],
            Err(e) => vec![format!("error: {}", e)],
        },
        Command::Dump => match node.dump() {
            Ok(entries) if entries.is_empty() => vec!["empty".to_string()],
            Ok(entries) => entries
                .iter()
                .map(|entry| format!("{} = {} {}", entry.key, entry.value, entry.timestamp))
                .collect(),
            Err(e) => vec![format!("error: {}", e)],
        },
        Command::Ready => match node.bootstrap_outcome() {
            Some(outcome) => vec![format!("ready: {}", outcome)],
            None => vec!["not ready".to_string()],
        },
        Command::Quit => vec!["bye".to_string()],
        Command::Usage(usage) => vec![usage.to_string()],
        Command::Unknown(name) => vec![format!("unknown command: {}", name)],
        Command::Empty => Vec::new(),
    }
}

/// Binds the control listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })
}

/// Accepts control sessions until the task is aborted.
pub async fn serve(listener: TcpListener, node: Arc<Node>) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Control shell started");
    }

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = session(stream, &node).await {
                        debug!(remote = %remote, error = %e, "Control session ended");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Control accept failed"),
        }
    }
}

async fn session(stream: TcpStream, node: &Node) -> Result<()> {
    let limits = &node.config().limits;
    let max_line = limits.max_key_bytes + limits.max_value_bytes + 64;
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(max_line));

    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| NodeError::Io(std::io::Error::other(e.to_string())))?;
        let command = Command::parse(&line);
        for response in execute(node, &command) {
            lines
                .send(response)
                .await
                .map_err(|e| NodeError::Io(std::io::Error::other(e.to_string())))?;
        }
        if command == Command::Quit {
            break;
        }
    }
    Ok(())
}
