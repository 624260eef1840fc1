//! Peer identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    /// The string has no `:` separating host and port.
    #[error("missing port in peer address '{0}'")]
    MissingPort(String),

    /// The host part is empty.
    #[error("empty host in peer address '{0}'")]
    EmptyHost(String),

    /// The port part is not a valid non-zero `u16`.
    #[error("invalid port in peer address '{0}'")]
    InvalidPort(String),
}

/// The identity of a node: the host and port its peer listener is reachable on.
///
/// Identities are totally ordered (host lexicographically, then port). The
/// order is the tie-break used when two writes carry the same Lamport counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr {
    host: String,
    port: u16,
}

impl PeerAddr {
    /// Creates a new peer address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns `(host, port)` suitable for `tokio::net::TcpStream::connect`.
    #[must_use]
    pub fn as_connect_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(AddrParseError::EmptyHost(s.to_string()));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| AddrParseError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(AddrParseError::InvalidPort(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = AddrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.to_string()
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: PeerAddr = "127.0.0.1:8411".parse().unwrap();
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 8411);
        assert_eq!(addr.to_string(), "127.0.0.1:8411");

        let v6: PeerAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:9000");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "localhost".parse::<PeerAddr>(),
            Err(AddrParseError::MissingPort(_))
        ));
        assert!(matches!(
            ":80".parse::<PeerAddr>(),
            Err(AddrParseError::EmptyHost(_))
        ));
        assert!(matches!(
            "host:0".parse::<PeerAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "host:99999".parse::<PeerAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_total_order() {
        let a = PeerAddr::new("a", 9000);
        let b = PeerAddr::new("b", 1);
        let a2 = PeerAddr::new("a", 9001);

        assert!(a < b);
        assert!(a < a2);
        assert!(a2 < b);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = PeerAddr::new("node-1", 8411);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"node-1:8411\"");

        let back: PeerAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
