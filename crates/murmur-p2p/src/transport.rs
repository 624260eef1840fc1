//! TCP connection layer.
//!
//! Each wire message travels as one length-delimited frame. Outbound
//! exchanges open a fresh connection, send one frame and optionally wait for
//! one reply; inbound connections are served by one task each and may carry
//! any number of frames. A frame that fails to decode, or a message the
//! handler rejects as malformed, closes only the connection that carried it.
//!
//! A [`TrafficObserver`] attached to either side sees every frame written
//! to a peer and every inbound frame dropped before it reached the handler.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use murmur_types::PeerAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::{Message, MessageKind, P2pError, Result, MAX_MESSAGE_SIZE};

/// Callback trait for handling decoded inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message received from `remote`.
    ///
    /// Returns an optional reply to write back on the same connection. An
    /// error for which [`P2pError::is_malformed`] holds closes the connection.
    async fn handle(&self, remote: SocketAddr, message: Message) -> Result<Option<Message>>;
}

/// Hooks for counting traffic at the connection layer.
pub trait TrafficObserver: Send + Sync + 'static {
    /// A message of `kind` was written to a peer, as a request or a reply.
    fn sent(&self, kind: MessageKind);

    /// An inbound frame was dropped because it was oversized or undecodable.
    fn rejected(&self);
}

/// Timeouts and limits for peer connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum time to establish an outbound connection.
    pub connect_timeout: Duration,
    /// Maximum time for one outbound exchange once connected.
    pub io_timeout: Duration,
    /// Maximum frame size accepted or produced.
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(5),
            max_frame_bytes: MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportConfig {
    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(self.max_frame_bytes)
            .new_codec()
    }
}

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Outbound side of the connection layer.
#[derive(Clone, Default)]
pub struct Transport {
    config: TransportConfig,
    observer: Option<Arc<dyn TrafficObserver>>,
}

impl Transport {
    /// Creates a new transport.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Reports every message this transport writes to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the transport configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends one message to `peer` without waiting for a reply.
    pub async fn send(&self, peer: &PeerAddr, message: &Message) -> Result<()> {
        let frame = self.frame(message)?;
        let mut framed = self.connect(peer).await?;

        tokio::time::timeout(self.config.io_timeout, framed.send(frame))
            .await
            .map_err(|_| P2pError::Timeout(format!("sending {} to {}", message.kind().as_str(), peer)))??;

        self.observe_sent(message.kind());
        debug!(peer = %peer, kind = message.kind().as_str(), "Sent message");
        Ok(())
    }

    /// Sends one message to `peer` and waits for its reply.
    pub async fn request(&self, peer: &PeerAddr, message: &Message) -> Result<Message> {
        let frame = self.frame(message)?;
        let mut framed = self.connect(peer).await?;

        let exchange = self.exchange(&mut framed, frame, message.kind(), peer);
        let reply = tokio::time::timeout(self.config.io_timeout, exchange)
            .await
            .map_err(|_| {
                P2pError::Timeout(format!(
                    "waiting for reply to {} from {}",
                    message.kind().as_str(),
                    peer
                ))
            })??;

        debug!(
            peer = %peer,
            request = message.kind().as_str(),
            reply = reply.kind().as_str(),
            "Completed exchange"
        );
        Ok(reply)
    }

    /// Like [`Transport::request`], but fails unless the reply has kind `expected`.
    pub async fn request_kind(
        &self,
        peer: &PeerAddr,
        message: &Message,
        expected: MessageKind,
    ) -> Result<Message> {
        let reply = self.request(peer, message).await?;
        if reply.kind() != expected {
            return Err(P2pError::UnexpectedResponse {
                expected,
                actual: reply.kind(),
            });
        }
        Ok(reply)
    }

    async fn exchange(
        &self,
        framed: &mut FramedStream,
        frame: Bytes,
        kind: MessageKind,
        peer: &PeerAddr,
    ) -> Result<Message> {
        framed.send(frame).await?;
        self.observe_sent(kind);
        match framed.next().await {
            Some(Ok(bytes)) => Message::decode(&bytes),
            Some(Err(e)) => Err(map_codec_error(e, self.config.max_frame_bytes)),
            None => Err(P2pError::Closed(peer.clone())),
        }
    }

    fn observe_sent(&self, kind: MessageKind) {
        if let Some(observer) = &self.observer {
            observer.sent(kind);
        }
    }

    fn frame(&self, message: &Message) -> Result<Bytes> {
        let frame = message.encode();
        if frame.len() > self.config.max_frame_bytes {
            return Err(P2pError::FrameTooLarge {
                size: frame.len(),
                limit: self.config.max_frame_bytes,
            });
        }
        Ok(frame)
    }

    async fn connect(&self, peer: &PeerAddr) -> Result<FramedStream> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(peer.as_connect_target()),
        )
        .await
        .map_err(|_| P2pError::Timeout(format!("connecting to {}", peer)))?
        .map_err(|e| P2pError::Connection {
            peer: peer.clone(),
            reason: e.to_string(),
        })?;

        stream.set_nodelay(true)?;
        Ok(Framed::new(stream, self.config.codec()))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

/// Inbound side of the connection layer.
pub struct Listener {
    inner: TcpListener,
    config: TransportConfig,
    observer: Option<Arc<dyn TrafficObserver>>,
}

impl Listener {
    /// Binds a listener to `addr`.
    pub async fn bind(addr: impl ToSocketAddrs, config: TransportConfig) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self {
            inner,
            config,
            observer: None,
        })
    }

    /// Reports replies written and frames dropped on every connection.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accepts connections forever, serving each on its own task.
    pub async fn serve(self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        info!(addr = %self.local_addr()?, "Peer listener started");

        loop {
            let (stream, remote) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Accept errors (e.g. EMFILE) are transient; back off briefly.
                    warn!(error = %e, "Failed to accept peer connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let handler = handler.clone();
            let observer = self.observer.clone();
            let config = self.config;
            tokio::spawn(async move {
                serve_connection(stream, remote, handler, observer, config).await;
            });
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.inner.local_addr().ok())
            .finish()
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    observer: Option<Arc<dyn TrafficObserver>>,
    config: TransportConfig,
) {
    let _ = stream.set_nodelay(true);
    let mut framed = Framed::new(stream, config.codec());

    while let Some(frame) = framed.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = map_codec_error(e, config.max_frame_bytes);
                if error.is_malformed() {
                    if let Some(observer) = &observer {
                        observer.rejected();
                    }
                }
                warn!(remote = %remote, error = %error, "Closing connection after bad frame");
                return;
            }
        };

        let message = match Message::decode(&bytes) {
            Ok(message) => message,
            Err(e) => {
                if let Some(observer) = &observer {
                    observer.rejected();
                }
                warn!(remote = %remote, error = %e, "Closing connection after undecodable message");
                return;
            }
        };

        match handler.handle(remote, message).await {
            Ok(Some(reply)) => {
                let kind = reply.kind();
                if let Err(e) = framed.send(reply.encode()).await {
                    debug!(remote = %remote, error = %e, "Failed to send reply");
                    return;
                }
                if let Some(observer) = &observer {
                    observer.sent(kind);
                }
            }
            Ok(None) => {}
            Err(e) if e.is_malformed() => {
                warn!(remote = %remote, error = %e, "Closing connection after invalid message");
                return;
            }
            Err(e) => {
                debug!(remote = %remote, error = %e, "Message handling failed");
            }
        }
    }

    debug!(remote = %remote, "Peer connection closed");
}

fn map_codec_error(e: std::io::Error, limit: usize) -> P2pError {
    // The length-delimited codec reports oversized frames as InvalidData.
    if e.kind() == std::io::ErrorKind::InvalidData {
        P2pError::InvalidMessage(format!("frame exceeds {} bytes", limit))
    } else {
        P2pError::Io(e)
    }
}
