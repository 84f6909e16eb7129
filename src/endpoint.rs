//! Addressable identity for binding and connecting.
//!
//! An [`Endpoint`] names a bindable address as a `(transport, host, port,
//! path)` tuple. TCP endpoints compare by host and port only; the path is
//! routing decoration that a stream socket cannot distinguish. In-process
//! endpoints compare on all fields because the path selects the shared
//! byte queue.
//!
//! # Example
//!
//! ```
//! use wirebus::{Endpoint, Transport};
//!
//! let ep: Endpoint = "tcp://Example.ORG:5555/queue".parse().unwrap();
//! assert_eq!(ep.transport(), Transport::Tcp);
//! assert_eq!(ep.host(), Some("example.org"));
//! assert_eq!(ep.port(), 5555);
//! assert_eq!(ep.path(), "/queue");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::WirebusError;

/// Transport selector for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Shared byte-queue loopback inside one process.
    Inproc,
    /// Stream socket over TCP.
    Tcp,
}

impl Transport {
    /// URI scheme for this transport.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Inproc => "inproc",
            Transport::Tcp => "tcp",
        }
    }
}

/// Addressable identity: `(transport, host, port, path)`.
///
/// The host is stored lower-cased so equality and hashing are
/// case-insensitive. An empty path normalizes to `"/"`.
#[derive(Debug, Clone, Eq)]
pub struct Endpoint {
    transport: Transport,
    host: Option<String>,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(transport: Transport, host: Option<&str>, port: u16, path: &str) -> Self {
        Self {
            transport,
            host: host.map(|h| h.to_ascii_lowercase()),
            port,
            path: normalize_path(path),
        }
    }

    /// Convenience constructor for a TCP endpoint.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(Transport::Tcp, Some(host), port, "/")
    }

    /// Convenience constructor for an in-process endpoint.
    pub fn inproc(path: &str) -> Self {
        Self::new(Transport::Inproc, None, 0, path)
    }

    /// The transport variant.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Lower-cased host, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port number (0 when the transport does not use one).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component, never empty.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        if self.transport != other.transport || self.host != other.host || self.port != other.port
        {
            return false;
        }
        // A TCP listener cannot tell two paths apart, so the path does not
        // participate in identity for that transport.
        self.transport == Transport::Tcp || self.path == other.path
    }
}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transport.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        if self.transport != Transport::Tcp {
            self.path.hash(state);
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.transport.scheme(),
            self.host.as_deref().unwrap_or(""),
            self.port,
            self.path
        )
    }
}

impl FromStr for Endpoint {
    type Err = WirebusError;

    /// Parse `<scheme>://<host>:<port><path>`.
    ///
    /// The scheme is case-insensitive; unknown schemes fail. The path is
    /// optional and defaults to `"/"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| WirebusError::InvalidEndpoint(s.to_string()))?;

        let transport = match scheme.to_ascii_lowercase().as_str() {
            "inproc" => Transport::Inproc,
            "tcp" => Transport::Tcp,
            _ => return Err(WirebusError::InvalidEndpoint(s.to_string())),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| WirebusError::InvalidEndpoint(s.to_string()))?;
                (h, port)
            }
            None => (authority, 0),
        };

        let host = if host.is_empty() { None } else { Some(host) };
        Ok(Endpoint::new(transport, host, port, path))
    }
}
