//! Control shell and health endpoint tests against running nodes.

use futures::{SinkExt, StreamExt};
use murmur_node::{Config, Node, NodeHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

async fn start_node(seeds: Vec<murmur_types::PeerAddr>) -> (Arc<Node>, NodeHandle) {
    let mut config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        control: Some("127.0.0.1:0".parse().unwrap()),
        health: Some("127.0.0.1:0".parse().unwrap()),
        seeds,
        ..Config::default()
    };
    config.gossip.interval_ms = 50;
    let node = Node::bind(config).await.unwrap();
    let handle = node.start().await.unwrap();
    assert!(node.wait_ready(Duration::from_secs(10)).await);
    (node, handle)
}

struct Shell(Framed<TcpStream, LinesCodec>);

impl Shell {
    async fn connect(handle: &NodeHandle) -> Self {
        let stream = TcpStream::connect(handle.control_addr().unwrap())
            .await
            .unwrap();
        Self(Framed::new(stream, LinesCodec::new()))
    }

    async fn send(&mut self, line: &str) {
        self.0.send(line).await.unwrap();
    }

    async fn line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.0.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    async fn run(&mut self, line: &str) -> String {
        self.send(line).await;
        self.line().await
    }
}

async fn http_get(handle: &NodeHandle, path: &str) -> String {
    let mut stream = TcpStream::connect(handle.health_addr().unwrap())
        .await
        .unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

// ==================== Control Shell ====================

#[tokio::test]
async fn test_shell_session() {
    let (node, handle) = start_node(vec![]).await;
    let mut shell = Shell::connect(&handle).await;

    assert!(shell.run("set greeting hello world").await.starts_with("accepted (1,"));
    assert_eq!(shell.run("get greeting").await, "hello world");
    assert_eq!(node.local_get("greeting").unwrap(), Some("hello world".into()));

    assert_eq!(shell.run("ready").await, "ready: standalone");
    assert_eq!(shell.run("peers").await, "no peers");
    assert_eq!(shell.run("launch rockets").await, "unknown command: launch");
    assert_eq!(shell.run("get").await, "usage: get <key>");

    assert!(shell.run("delete greeting").await.starts_with("accepted (2,"));
    assert_eq!(shell.run("get greeting").await, "(nil)");

    assert_eq!(shell.run("quit").await, "bye");
    assert!(shell.0.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shell_lists_peers_and_dump() {
    let (a, a_handle) = start_node(vec![]).await;
    let (b, _b_handle) = start_node(vec![a.identity().clone()]).await;
    b.local_propose("k", "v").unwrap();

    let mut shell = Shell::connect(&a_handle).await;

    let peers = shell.run("peers").await;
    assert!(peers.starts_with(&format!("{} alive", b.identity())));

    // Replication is asynchronous
    let mut dump = String::new();
    for _ in 0..100 {
        dump = shell.run("dump").await;
        if dump != "empty" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(dump, format!("k = v (1, {})", b.identity()));
}

#[tokio::test]
async fn test_help_lists_every_command() {
    let (_node, handle) = start_node(vec![]).await;
    let mut shell = Shell::connect(&handle).await;

    shell.send("help").await;
    let mut lines = Vec::new();
    for _ in 0..8 {
        lines.push(shell.line().await);
    }
    for command in ["help", "peers", "get", "set", "delete", "dump", "ready", "quit"] {
        assert!(lines.iter().any(|line| line.starts_with(command)));
    }
}

// ==================== Health ====================

#[tokio::test]
async fn test_health_endpoints_over_http() {
    let (node, handle) = start_node(vec![]).await;
    node.local_propose("k", "v").unwrap();

    let ready = http_get(&handle, "/health/ready").await;
    assert!(ready.starts_with("HTTP/1.1 200"));
    assert!(ready.contains("\"status\":\"up\""));

    let summary = http_get(&handle, "/health").await;
    assert!(summary.contains("\"store_keys\":1"));
    assert!(summary.contains(&node.identity().to_string()));

    let metrics = http_get(&handle, "/metrics").await;
    assert!(metrics.contains("murmur_store_keys 1"));
    assert!(metrics.contains("# TYPE murmur_writes counter"));
}
