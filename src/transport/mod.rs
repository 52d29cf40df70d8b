//! Transport layer abstraction for NETCONF sessions.
//!
//! The engine never performs the secure-transport handshake itself. It is
//! handed an already-open duplex byte stream (a [`ByteChannel`]) together with
//! informational [`TransportInfo`] about the peer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            NETCONF Session              │
//! │          (Transport-Agnostic)           │
//! └──────────────────┬──────────────────────┘
//!                    │ ByteChannel
//!          ┌─────────┼──────────┐
//!          ▼         ▼          ▼
//! ┌──────────────┐ ┌────────┐ ┌──────────────┐
//! │ SSH subsystem│ │  TLS   │ │ TcpTransport │
//! │ (StdioChannel)│ │(extern)│ │  (dev only)  │
//! └──────────────┘ └────────┘ └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use netconf::transport::{StdioChannel, TransportKind};
//!
//! // Serve a session spawned as an SSH subsystem handler
//! let channel = StdioChannel::new();
//! let kind = TransportKind::Ssh;
//! ```

mod tcp;

pub use tcp::TcpTransport;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Duplex byte stream carrying one NETCONF session.
///
/// Implemented for every `AsyncRead + AsyncWrite` stream, so TCP sockets,
/// SSH channels or `tokio::io::duplex` test pipes can be passed directly.
pub trait ByteChannel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteChannel for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Secure transport the channel was established over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// NETCONF over SSH (RFC 6242), the mandatory transport
    #[default]
    Ssh,
    /// NETCONF over TLS (RFC 7589)
    Tls,
    /// Plain TCP, development and testing only
    Tcp,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ssh => "SSH",
            Self::Tls => "TLS",
            Self::Tcp => "TCP",
        }
    }

    /// IANA-assigned port for this transport.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Ssh => 830,
            Self::Tls => 6513,
            Self::Tcp => 8300,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "tls" => Ok(Self::Tls),
            "tcp" | "plain" => Ok(Self::Tcp),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Peer metadata supplied by the transport collaborator.
///
/// Informational only: the engine logs it and exposes it on the session but
/// never uses it to open connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportInfo {
    /// Remote host
    pub host: Option<String>,
    /// Remote port
    pub port: Option<u16>,
    /// Authenticated user name
    pub user: Option<String>,
    /// Transport kind
    pub kind: TransportKind,
}

impl TransportInfo {
    /// Metadata for a client connection.
    pub fn client(host: impl Into<String>, port: u16, user: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            kind,
        }
    }

    /// Metadata for a server-side session; only the user is known.
    pub fn server(user: Option<String>, kind: TransportKind) -> Self {
        Self {
            user,
            kind,
            ..Default::default()
        }
    }
}

/// Process standard input/output as a [`ByteChannel`].
///
/// Used when the process is spawned per connection as a transport
/// subsystem handler. Logs must go to stderr in that mode.
#[derive(Debug)]
pub struct StdioChannel {
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
}

impl StdioChannel {
    /// Wrap the process stdin/stdout.
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for StdioChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str("ssh").unwrap(), TransportKind::Ssh);
        assert_eq!(TransportKind::from_str("TLS").unwrap(), TransportKind::Tls);
        assert_eq!(TransportKind::from_str("plain").unwrap(), TransportKind::Tcp);
        assert!(TransportKind::from_str("quic").is_err());
    }

    #[test]
    fn test_transport_kind_default() {
        assert_eq!(TransportKind::default(), TransportKind::Ssh);
        assert_eq!(TransportKind::Ssh.default_port(), 830);
        assert_eq!(TransportKind::Tls.to_string(), "TLS");
    }

    #[test]
    fn test_duplex_is_byte_channel() {
        fn assert_channel<C: ByteChannel>(_: &C) {}
        let (a, _b) = tokio::io::duplex(64);
        assert_channel(&a);
    }

    #[test]
    fn test_server_info_has_no_peer_address() {
        let info = TransportInfo::server(Some("admin".to_string()), TransportKind::Ssh);
        assert_eq!(info.host, None);
        assert_eq!(info.user.as_deref(), Some("admin"));
    }
}
