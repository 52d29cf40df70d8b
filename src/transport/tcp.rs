//! Plain TCP listener for NETCONF sessions.
//!
//! Stands in for the SSH/TLS collaborator during development and testing:
//! every accepted socket is handed to a connection handler running in its own
//! tokio task. Offers no authentication or encryption.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{NetconfError, Result};

/// TCP transport spawning one task per accepted connection.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Address to listen on.
    listen_addr: SocketAddr,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    /// Create with default localhost address.
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Configured listen address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Bind the listener.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.listen_addr).await.map_err(|e| {
            NetconfError::Config(format!("Failed to bind TCP to {}: {}", self.listen_addr, e))
        })
    }

    /// Accept connections forever, running `handler` for each in a new task.
    pub async fn serve<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        tracing::info!("TCP transport listening on {}", listener.local_addr()?);
        Self::accept_loop(listener, handler).await
    }

    /// Accept loop over an already bound listener.
    pub async fn accept_loop<F, Fut>(listener: TcpListener, handler: F) -> Result<()>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "set_nodelay failed");
            }
            tracing::debug!(%peer, "accepted connection");
            tokio::spawn(handler(stream, peer));
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::localhost(super::TransportKind::Tcp.default_port())
    }
}
