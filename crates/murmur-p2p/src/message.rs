//! Peer protocol messages and their binary encoding.
//!
//! Every message is encoded as a one-byte kind followed by a kind-specific
//! payload. Strings are length-prefixed UTF-8, integers are big-endian and
//! lists carry a `u32` item count. Decoding is strict: unknown kinds,
//! truncated fields, bad UTF-8 and trailing bytes are all rejected.
//!
//! Snapshots are paged. A [`Message::SnapshotRequest`] names the last key
//! the requester already holds, and each [`Message::SnapshotResponse`]
//! carries the following keys in ascending order, as many as fit one frame,
//! plus a flag saying whether more remain.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use murmur_types::{Entry, LogicalTimestamp, PeerAddr, Timestamp, Value};

use crate::{P2pError, Result};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Push a peer sample to a peer.
    GossipPush = 1,
    /// Ask a peer for its peer sample.
    GossipPullRequest = 2,
    /// Answer to a pull request.
    GossipPullResponse = 3,
    /// Ask a peer to order a write.
    WritePropose = 4,
    /// Replicate an accepted write.
    WriteAccept = 5,
    /// Ask a peer for one page of its database.
    SnapshotRequest = 6,
    /// One page of a database dump.
    SnapshotResponse = 7,
}

impl MessageKind {
    /// Parse a message kind from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageKind::GossipPush),
            2 => Ok(MessageKind::GossipPullRequest),
            3 => Ok(MessageKind::GossipPullResponse),
            4 => Ok(MessageKind::WritePropose),
            5 => Ok(MessageKind::WriteAccept),
            6 => Ok(MessageKind::SnapshotRequest),
            7 => Ok(MessageKind::SnapshotResponse),
            _ => Err(P2pError::InvalidMessage(format!(
                "unknown message kind: {}",
                b
            ))),
        }
    }

    /// Returns a stable lowercase label, used for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::GossipPush => "gossip_push",
            MessageKind::GossipPullRequest => "gossip_pull_request",
            MessageKind::GossipPullResponse => "gossip_pull_response",
            MessageKind::WritePropose => "write_propose",
            MessageKind::WriteAccept => "write_accept",
            MessageKind::SnapshotRequest => "snapshot_request",
            MessageKind::SnapshotResponse => "snapshot_response",
        }
    }
}

/// A peer identity together with when it was last heard from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerSample {
    /// The peer.
    pub addr: PeerAddr,
    /// When the advertising node last heard from it.
    pub last_seen: Timestamp,
}

impl PeerSample {
    /// Creates a new sample entry.
    #[must_use]
    pub fn new(addr: PeerAddr, last_seen: Timestamp) -> Self {
        Self { addr, last_seen }
    }
}

/// Unified message enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sender identity plus a sample of peers it knows.
    GossipPush {
        /// The pushing node.
        sender: PeerAddr,
        /// Peers known to the sender.
        sample: Vec<PeerSample>,
    },
    /// Request for the receiver's peer sample.
    GossipPullRequest {
        /// The requesting node.
        sender: PeerAddr,
    },
    /// Answer to [`Message::GossipPullRequest`].
    GossipPullResponse {
        /// Peers known to the responder.
        sample: Vec<PeerSample>,
    },
    /// A write the sender wants the receiver to order.
    WritePropose(Entry),
    /// A write the sender has accepted.
    WriteAccept(Entry),
    /// Request for the next page of the receiver's database.
    SnapshotRequest {
        /// Last key of the previous page; `None` starts from the first key.
        after: Option<String>,
    },
    /// One page of the responder's database, tombstones included.
    SnapshotResponse {
        /// Entries in strictly ascending key order.
        entries: Vec<Entry>,
        /// True if keys after the last entry remain.
        more: bool,
    },
}

/// Bounds enforced on decoded messages before they are acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// Maximum key length in bytes.
    pub max_key_bytes: usize,
    /// Maximum value length in bytes.
    pub max_value_bytes: usize,
    /// Maximum number of peers in a gossip sample.
    pub max_peer_sample: usize,
    /// Maximum number of entries in a snapshot.
    pub max_snapshot_entries: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_key_bytes: 1024,
            max_value_bytes: 1024 * 1024,
            max_peer_sample: 256,
            max_snapshot_entries: 100_000,
        }
    }
}

// Smallest encodings, used to cap pre-allocation on decode.
const MIN_ADDR_LEN: usize = 2 + 2;
const MIN_SAMPLE_LEN: usize = MIN_ADDR_LEN + 8;
const MIN_ENTRY_LEN: usize = 2 + 1 + 8 + MIN_ADDR_LEN;

const TAG_TOMBSTONE: u8 = 0;
const TAG_PRESENT: u8 = 1;

/// Bytes a snapshot page spends outside its entries: kind, count and flag.
pub const SNAPSHOT_PAGE_OVERHEAD: usize = 1 + 4 + 1;

/// Returns the number of bytes `entry` occupies on the wire.
#[must_use]
pub fn encoded_entry_len(entry: &Entry) -> usize {
    let value = match &entry.value {
        Value::Tombstone => 1,
        Value::Present(bytes) => 1 + 4 + bytes.len(),
    };
    2 + entry.key.len() + value + 8 + 2 + entry.timestamp.proposer.host().len() + 2
}

impl Message {
    /// Returns the kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::GossipPush { .. } => MessageKind::GossipPush,
            Message::GossipPullRequest { .. } => MessageKind::GossipPullRequest,
            Message::GossipPullResponse { .. } => MessageKind::GossipPullResponse,
            Message::WritePropose(_) => MessageKind::WritePropose,
            Message::WriteAccept(_) => MessageKind::WriteAccept,
            Message::SnapshotRequest { .. } => MessageKind::SnapshotRequest,
            Message::SnapshotResponse { .. } => MessageKind::SnapshotResponse,
        }
    }

    /// Builds the snapshot page that follows `after` out of `sorted`.
    ///
    /// `sorted` must be in ascending key order. The page stops before the
    /// encoded message would exceed `max_frame_bytes` or hold more than
    /// `max_entries` entries, but always carries at least one entry when
    /// any remain.
    #[must_use]
    pub fn snapshot_page(
        sorted: &[Entry],
        after: Option<&str>,
        max_frame_bytes: usize,
        max_entries: usize,
    ) -> Self {
        let start = match after {
            Some(after) => sorted.partition_point(|entry| entry.key.as_str() <= after),
            None => 0,
        };
        let remaining = &sorted[start..];

        let mut size = SNAPSHOT_PAGE_OVERHEAD;
        let mut taken = 0;
        for entry in remaining {
            let len = encoded_entry_len(entry);
            if taken > 0 && (taken >= max_entries || size + len > max_frame_bytes) {
                break;
            }
            size += len;
            taken += 1;
        }

        Message::SnapshotResponse {
            entries: remaining[..taken].to_vec(),
            more: taken < remaining.len(),
        }
    }

    /// Encode the message to bytes.
    ///
    /// Keys and hosts must fit a `u16` length prefix; callers enforce this
    /// through [`MessageLimits`] before a message is built.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind() as u8);

        match self {
            Message::GossipPush { sender, sample } => {
                put_addr(&mut buf, sender);
                put_sample(&mut buf, sample);
            }
            Message::GossipPullRequest { sender } => put_addr(&mut buf, sender),
            Message::GossipPullResponse { sample } => put_sample(&mut buf, sample),
            Message::WritePropose(entry) | Message::WriteAccept(entry) => {
                put_entry(&mut buf, entry);
            }
            Message::SnapshotRequest { after } => match after {
                Some(key) => {
                    buf.put_u8(1);
                    put_str_u16(&mut buf, key);
                }
                None => buf.put_u8(0),
            },
            Message::SnapshotResponse { entries, more } => {
                buf.put_u32(entries.len() as u32);
                for entry in entries {
                    put_entry(&mut buf, entry);
                }
                buf.put_u8(u8::from(*more));
            }
        }

        buf.freeze()
    }

    /// Decode a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(P2pError::InvalidMessage("empty message".into()));
        }

        let kind = MessageKind::from_byte(data[0])?;
        let mut buf = &data[1..];

        let message = match kind {
            MessageKind::GossipPush => {
                let sender = get_addr(&mut buf)?;
                let sample = get_sample(&mut buf)?;
                Message::GossipPush { sender, sample }
            }
            MessageKind::GossipPullRequest => Message::GossipPullRequest {
                sender: get_addr(&mut buf)?,
            },
            MessageKind::GossipPullResponse => Message::GossipPullResponse {
                sample: get_sample(&mut buf)?,
            },
            MessageKind::WritePropose => Message::WritePropose(get_entry(&mut buf)?),
            MessageKind::WriteAccept => Message::WriteAccept(get_entry(&mut buf)?),
            MessageKind::SnapshotRequest => {
                let after = if get_flag(&mut buf, "cursor flag")? {
                    Some(get_str_u16(&mut buf, "cursor")?)
                } else {
                    None
                };
                Message::SnapshotRequest { after }
            }
            MessageKind::SnapshotResponse => {
                let count = get_count(&mut buf, "entry count")?;
                let mut entries = Vec::with_capacity(count.min(buf.remaining() / MIN_ENTRY_LEN));
                for _ in 0..count {
                    entries.push(get_entry(&mut buf)?);
                }
                let more = get_flag(&mut buf, "more flag")?;
                Message::SnapshotResponse { entries, more }
            }
        };

        if buf.has_remaining() {
            return Err(P2pError::InvalidMessage(format!(
                "{} trailing bytes after {}",
                buf.remaining(),
                kind.as_str()
            )));
        }

        Ok(message)
    }

    /// Check the message against `limits`.
    ///
    /// Decoding only guarantees structure; this checks the semantic bounds a
    /// node is willing to act on.
    pub fn validate(&self, limits: &MessageLimits) -> Result<()> {
        match self {
            Message::GossipPush { sender, sample } => {
                validate_addr(sender)?;
                validate_sample(sample, limits)
            }
            Message::GossipPullRequest { sender } => validate_addr(sender),
            Message::GossipPullResponse { sample } => validate_sample(sample, limits),
            Message::WritePropose(entry) | Message::WriteAccept(entry) => {
                validate_entry(entry, limits)
            }
            Message::SnapshotRequest { after: None } => Ok(()),
            Message::SnapshotRequest { after: Some(key) } => {
                if key.is_empty() || key.len() > limits.max_key_bytes {
                    return Err(P2pError::InvalidMessage(format!(
                        "snapshot cursor of {} bytes",
                        key.len()
                    )));
                }
                Ok(())
            }
            Message::SnapshotResponse { entries, more } => {
                if entries.len() > limits.max_snapshot_entries {
                    return Err(P2pError::InvalidMessage(format!(
                        "snapshot page has {} entries, limit is {}",
                        entries.len(),
                        limits.max_snapshot_entries
                    )));
                }
                if *more && entries.is_empty() {
                    return Err(P2pError::InvalidMessage(
                        "empty snapshot page claims more entries".into(),
                    ));
                }
                if entries.windows(2).any(|pair| pair[0].key >= pair[1].key) {
                    return Err(P2pError::InvalidMessage(
                        "snapshot page keys are not strictly ascending".into(),
                    ));
                }
                entries
                    .iter()
                    .try_for_each(|entry| validate_entry(entry, limits))
            }
        }
    }
}

/// Check a single entry against `limits`.
pub fn validate_entry(entry: &Entry, limits: &MessageLimits) -> Result<()> {
    if entry.key.is_empty() {
        return Err(P2pError::InvalidMessage("empty key".into()));
    }
    if entry.key.len() > limits.max_key_bytes {
        return Err(P2pError::InvalidMessage(format!(
            "key of {} bytes exceeds limit of {}",
            entry.key.len(),
            limits.max_key_bytes
        )));
    }
    if entry.value.len() > limits.max_value_bytes {
        return Err(P2pError::InvalidMessage(format!(
            "value of {} bytes exceeds limit of {}",
            entry.value.len(),
            limits.max_value_bytes
        )));
    }
    validate_addr(&entry.timestamp.proposer)
}

fn validate_addr(addr: &PeerAddr) -> Result<()> {
    if addr.host().is_empty() {
        return Err(P2pError::InvalidMessage("empty host".into()));
    }
    if addr.port() == 0 {
        return Err(P2pError::InvalidMessage(format!("zero port for {}", addr)));
    }
    Ok(())
}

fn validate_sample(sample: &[PeerSample], limits: &MessageLimits) -> Result<()> {
    if sample.len() > limits.max_peer_sample {
        return Err(P2pError::InvalidMessage(format!(
            "peer sample of {} exceeds limit of {}",
            sample.len(),
            limits.max_peer_sample
        )));
    }
    sample.iter().try_for_each(|peer| validate_addr(&peer.addr))
}

fn put_str_u16(buf: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize);
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_addr(buf: &mut BytesMut, addr: &PeerAddr) {
    put_str_u16(buf, addr.host());
    buf.put_u16(addr.port());
}

fn put_sample(buf: &mut BytesMut, sample: &[PeerSample]) {
    buf.put_u32(sample.len() as u32);
    for peer in sample {
        put_addr(buf, &peer.addr);
        buf.put_i64(peer.last_seen.as_millis());
    }
}

fn put_entry(buf: &mut BytesMut, entry: &Entry) {
    put_str_u16(buf, &entry.key);
    match &entry.value {
        Value::Tombstone => buf.put_u8(TAG_TOMBSTONE),
        Value::Present(bytes) => {
            buf.put_u8(TAG_PRESENT);
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }
    }
    buf.put_u64(entry.timestamp.counter);
    put_addr(buf, &entry.timestamp.proposer);
}

fn truncated(what: &str) -> P2pError {
    P2pError::InvalidMessage(format!("truncated {}", what))
}

fn get_count(buf: &mut &[u8], what: &str) -> Result<usize> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    Ok(buf.get_u32() as usize)
}

fn get_flag(buf: &mut &[u8], what: &str) -> Result<bool> {
    if buf.remaining() < 1 {
        return Err(truncated(what));
    }
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(P2pError::InvalidMessage(format!("invalid {}: {}", what, b))),
    }
}

fn get_str_u16(buf: &mut &[u8], what: &str) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(truncated(what));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|e| P2pError::InvalidMessage(format!("invalid {}: {}", what, e)))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_addr(buf: &mut &[u8]) -> Result<PeerAddr> {
    let host = get_str_u16(buf, "host")?;
    if buf.remaining() < 2 {
        return Err(truncated("port"));
    }
    Ok(PeerAddr::new(host, buf.get_u16()))
}

fn get_sample(buf: &mut &[u8]) -> Result<Vec<PeerSample>> {
    let count = get_count(buf, "sample count")?;
    let mut sample = Vec::with_capacity(count.min(buf.remaining() / MIN_SAMPLE_LEN));
    for _ in 0..count {
        let addr = get_addr(buf)?;
        if buf.remaining() < 8 {
            return Err(truncated("last seen"));
        }
        let last_seen = Timestamp::from_millis(buf.get_i64());
        sample.push(PeerSample { addr, last_seen });
    }
    Ok(sample)
}

fn get_entry(buf: &mut &[u8]) -> Result<Entry> {
    let key = get_str_u16(buf, "key")?;

    if buf.remaining() < 1 {
        return Err(truncated("value tag"));
    }
    let value = match buf.get_u8() {
        TAG_TOMBSTONE => Value::Tombstone,
        TAG_PRESENT => {
            let len = get_count(buf, "value length")?;
            if buf.remaining() < len {
                return Err(truncated("value"));
            }
            let bytes = Bytes::copy_from_slice(&buf[..len]);
            buf.advance(len);
            Value::Present(bytes)
        }
        t => {
            return Err(P2pError::InvalidMessage(format!(
                "invalid value tag: {}",
                t
            )))
        }
    };

    if buf.remaining() < 8 {
        return Err(truncated("counter"));
    }
    let counter = buf.get_u64();
    let proposer = get_addr(buf)?;

    Ok(Entry {
        key,
        value,
        timestamp: LogicalTimestamp::new(counter, proposer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(host: &str, port: u16) -> PeerAddr {
        PeerAddr::new(host, port)
    }

    fn entry(key: &str, value: &str, counter: u64) -> Entry {
        Entry::new(key, value, LogicalTimestamp::new(counter, addr("node-b", 8412)))
    }

    #[test]
    fn test_gossip_push_roundtrip() {
        let msg = Message::GossipPush {
            sender: addr("node-a", 8411),
            sample: vec![
                PeerSample::new(addr("node-b", 8412), Timestamp::from_millis(1_000)),
                PeerSample::new(addr("node-c", 8413), Timestamp::from_millis(-5)),
            ],
        };

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_write_and_snapshot_roundtrip() {
        let write = Message::WriteAccept(entry("x", "1", 1));
        assert_eq!(Message::decode(&write.encode()).unwrap(), write);

        let snapshot = Message::SnapshotResponse {
            entries: vec![
                entry("x", "1", 1),
                Entry::tombstone("y", LogicalTimestamp::new(4, addr("node-c", 1))),
            ],
            more: true,
        };
        assert_eq!(Message::decode(&snapshot.encode()).unwrap(), snapshot);

        let first = Message::SnapshotRequest { after: None };
        assert_eq!(first.encode().as_ref(), &[6u8, 0]);
        assert_eq!(Message::decode(&first.encode()).unwrap(), first);

        let next = Message::SnapshotRequest {
            after: Some("x".into()),
        };
        assert_eq!(next.encode().as_ref(), &[6u8, 1, 0, 1, b'x']);
        assert_eq!(Message::decode(&next.encode()).unwrap(), next);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[0]).is_err());
        assert!(Message::decode(&[42]).is_err());

        // Truncated pull request: host length says 5 but only 2 bytes follow
        assert!(Message::decode(&[2, 0, 5, b'a', b'b']).is_err());

        // Trailing garbage after a snapshot request
        assert!(Message::decode(&[6, 0, 0xff]).is_err());

        // Cursor flag other than 0 or 1
        assert!(Message::decode(&[6, 2]).is_err());

        // Snapshot page without its trailing flag
        assert!(Message::decode(&[7, 0, 0, 0, 0]).is_err());

        // Unknown value tag
        let mut bytes = Message::WriteAccept(entry("k", "v", 1)).encode().to_vec();
        bytes[1 + 2 + 1] = 9;
        assert!(Message::decode(&bytes).is_err());

        // Invalid UTF-8 key
        let mut bytes = Message::WriteAccept(entry("k", "v", 1)).encode().to_vec();
        bytes[3] = 0xff;
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_huge_count_does_not_preallocate() {
        // Claims u32::MAX sample entries with no data behind them
        let data = [3u8, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            Message::decode(&data),
            Err(P2pError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_validate_limits() {
        let limits = MessageLimits {
            max_key_bytes: 4,
            max_value_bytes: 4,
            max_peer_sample: 1,
            max_snapshot_entries: 1,
        };

        assert!(Message::WriteAccept(entry("key", "val", 1))
            .validate(&limits)
            .is_ok());
        assert!(Message::WriteAccept(entry("", "val", 1))
            .validate(&limits)
            .is_err());
        assert!(Message::WriteAccept(entry("too-long", "v", 1))
            .validate(&limits)
            .is_err());
        assert!(Message::WritePropose(entry("k", "too-long", 1))
            .validate(&limits)
            .is_err());

        let push = Message::GossipPush {
            sender: addr("a", 1),
            sample: vec![
                PeerSample::new(addr("b", 2), Timestamp::epoch()),
                PeerSample::new(addr("c", 3), Timestamp::epoch()),
            ],
        };
        assert!(push.validate(&limits).is_err());

        let zero_port = Message::GossipPullRequest {
            sender: addr("a", 0),
        };
        assert!(zero_port.validate(&limits).is_err());

        let snapshot = Message::SnapshotResponse {
            entries: vec![entry("a", "1", 1), entry("b", "2", 2)],
            more: false,
        };
        assert!(snapshot.validate(&limits).is_err());

        let stalled = Message::SnapshotResponse {
            entries: vec![],
            more: true,
        };
        assert!(stalled.validate(&limits).is_err());

        let cursor = Message::SnapshotRequest {
            after: Some("too-long".into()),
        };
        assert!(cursor.validate(&limits).is_err());
    }

    #[test]
    fn test_snapshot_page_order_is_validated() {
        let limits = MessageLimits::default();
        let unordered = Message::SnapshotResponse {
            entries: vec![entry("b", "1", 1), entry("a", "2", 2)],
            more: false,
        };
        assert!(unordered.validate(&limits).is_err());

        let duplicated = Message::SnapshotResponse {
            entries: vec![entry("a", "1", 1), entry("a", "2", 2)],
            more: false,
        };
        assert!(duplicated.validate(&limits).is_err());
    }

    #[test]
    fn test_encoded_entry_len_matches_encoding() {
        for e in [
            entry("key", "value", 7),
            Entry::tombstone("gone", LogicalTimestamp::new(2, addr("node-c", 1))),
        ] {
            let encoded = Message::WriteAccept(e.clone()).encode();
            assert_eq!(encoded.len(), 1 + encoded_entry_len(&e));
        }
    }

    #[test]
    fn test_snapshot_pages_fit_the_frame() {
        let sorted: Vec<Entry> = (0..10)
            .map(|i| entry(&format!("k{}", i), &"v".repeat(100), i))
            .collect();
        let per_entry = encoded_entry_len(&sorted[0]);
        let max_frame = SNAPSHOT_PAGE_OVERHEAD + 3 * per_entry;

        let mut after: Option<String> = None;
        let mut collected = Vec::new();
        let mut pages = 0;
        loop {
            let page = Message::snapshot_page(&sorted, after.as_deref(), max_frame, 100);
            assert!(page.encode().len() <= max_frame);
            let Message::SnapshotResponse { entries, more } = page else {
                panic!("not a snapshot page");
            };
            pages += 1;
            after = entries.last().map(|e| e.key.clone());
            collected.extend(entries);
            if !more {
                break;
            }
        }

        assert_eq!(pages, 4);
        assert_eq!(collected, sorted);
    }

    #[test]
    fn test_snapshot_page_limits() {
        let sorted = vec![entry("a", "1", 1), entry("b", "2", 2), entry("c", "3", 3)];

        // Entry cap applies before the byte budget
        let page = Message::snapshot_page(&sorted, None, usize::MAX, 2);
        assert_eq!(
            page,
            Message::SnapshotResponse {
                entries: sorted[..2].to_vec(),
                more: true,
            }
        );

        // An entry larger than the budget still makes progress
        let page = Message::snapshot_page(&sorted, Some("a"), 1, 10);
        assert_eq!(
            page,
            Message::SnapshotResponse {
                entries: vec![sorted[1].clone()],
                more: true,
            }
        );

        // A cursor past the last key yields an empty final page
        let page = Message::snapshot_page(&sorted, Some("c"), usize::MAX, 10);
        assert_eq!(
            page,
            Message::SnapshotResponse {
                entries: vec![],
                more: false,
            }
        );
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Message::decode(&data);
        }

        #[test]
        fn prop_truncation_is_rejected(
            key in "[a-z]{1,16}",
            value in prop::collection::vec(any::<u8>(), 0..64),
            counter in any::<u64>(),
            cut in 1usize..32,
        ) {
            let msg = Message::WritePropose(Entry::new(
                key,
                value,
                LogicalTimestamp::new(counter, addr("node-a", 8411)),
            ));
            let encoded = msg.encode();
            let cut = cut.min(encoded.len() - 1);
            prop_assert!(Message::decode(&encoded[..encoded.len() - cut]).is_err());
        }
    }
}
