//! Peer protocol tests against a running node.
//!
//! A peer that sends garbage loses its own connection and nothing else:
//! the registry, the store and other connections are untouched.

use murmur_node::{Config, Node, NodeHandle};
use murmur_p2p::{Message, MessageKind, Transport};
use murmur_types::{Entry, LogicalTimestamp, PeerAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start_node() -> (Arc<Node>, NodeHandle) {
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        ..Config::default()
    };
    let node = Node::bind(config).await.unwrap();
    let handle = node.start().await.unwrap();
    assert!(node.wait_ready(Duration::from_secs(5)).await);
    (node, handle)
}

fn first_page() -> Message {
    Message::SnapshotRequest { after: None }
}

fn empty_page() -> Message {
    Message::SnapshotResponse {
        entries: vec![],
        more: false,
    }
}

fn invalid_messages(node: &Node) -> String {
    node.encode_metrics()
        .unwrap()
        .lines()
        .find(|line| line.starts_with("murmur_p2p_invalid_messages_total"))
        .unwrap()
        .to_string()
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

/// Returns true if the node closed the connection.
async fn closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

#[tokio::test]
async fn test_garbage_closes_only_its_connection() {
    let (node, _handle) = start_node().await;
    let addr = node.listen_addr();

    // An open bystander connection keeps working throughout
    let mut bystander = TcpStream::connect(addr).await.unwrap();

    let mut attacker = TcpStream::connect(addr).await.unwrap();
    attacker.write_all(&frame(&[0xff, 1, 2, 3])).await.unwrap();
    assert!(closed(&mut attacker).await);
    assert_eq!(invalid_messages(&node), "murmur_p2p_invalid_messages_total 1");

    bystander
        .write_all(&frame(&first_page().encode()))
        .await
        .unwrap();
    let mut len = [0u8; 4];
    bystander.read_exact(&mut len).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    bystander.read_exact(&mut body).await.unwrap();
    assert_eq!(Message::decode(&body).unwrap(), empty_page());

    assert!(node.registry().is_empty());
    assert!(node.dump().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let (node, _handle) = start_node().await;

    let mut stream = TcpStream::connect(node.listen_addr()).await.unwrap();
    let limit = node.config().transport.max_frame_bytes as u32;
    stream.write_all(&(limit + 1).to_be_bytes()).await.unwrap();
    assert!(closed(&mut stream).await);
    assert_eq!(invalid_messages(&node), "murmur_p2p_invalid_messages_total 1");
}

#[tokio::test]
async fn test_invalid_entry_is_not_applied() {
    let (node, _handle) = start_node().await;
    let sender = PeerAddr::new("127.0.0.1", 9);

    // Decodes fine but carries an empty key
    let invalid = Message::WriteAccept(Entry::new("", "v", LogicalTimestamp::new(1, sender)));
    let mut stream = TcpStream::connect(node.listen_addr()).await.unwrap();
    stream.write_all(&frame(&invalid.encode())).await.unwrap();
    assert!(closed(&mut stream).await);
    assert!(node.dump().unwrap().is_empty());
    assert_eq!(invalid_messages(&node), "murmur_p2p_invalid_messages_total 1");

    // The node still answers well-formed requests
    let reply = Transport::default()
        .request_kind(node.identity(), &first_page(), MessageKind::SnapshotResponse)
        .await
        .unwrap();
    assert_eq!(reply, empty_page());
}

#[tokio::test]
async fn test_write_accept_redelivery_is_idempotent() {
    let (node, _handle) = start_node().await;
    let entry = Entry::new(
        "k",
        "v",
        LogicalTimestamp::new(7, PeerAddr::new("127.0.0.1", 9)),
    );

    let transport = Transport::default();
    for _ in 0..3 {
        transport
            .send(node.identity(), &Message::WriteAccept(entry.clone()))
            .await
            .unwrap();
    }

    let mut stored = Vec::new();
    for _ in 0..100 {
        stored = node.dump().unwrap();
        if !stored.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stored, vec![entry]);
    assert_eq!(node.consensus().clock().current(), 7);
}

#[tokio::test]
async fn test_snapshot_is_served_in_frame_sized_pages() {
    let mut config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        ..Config::default()
    };
    config.transport.max_frame_bytes = 4096;
    config.limits.max_value_bytes = 1024;
    let node = Node::bind(config).await.unwrap();
    let _handle = node.start().await.unwrap();
    assert!(node.wait_ready(Duration::from_secs(5)).await);

    for i in 0..8 {
        node.local_propose(&format!("k{}", i), vec![b'x'; 1000]).unwrap();
    }

    let transport = Transport::default();
    let mut after = None;
    let mut received = Vec::new();
    let mut pages = 0;
    loop {
        let request = Message::SnapshotRequest { after };
        let reply = transport
            .request_kind(node.identity(), &request, MessageKind::SnapshotResponse)
            .await
            .unwrap();
        assert!(reply.encode().len() <= 4096);
        let Message::SnapshotResponse { entries, more } = reply else {
            panic!("not a snapshot page");
        };
        pages += 1;
        after = entries.last().map(|entry| entry.key.clone());
        received.extend(entries);
        if !more {
            break;
        }
    }

    assert!(pages > 1);
    assert_eq!(received, node.dump().unwrap());
}
