//! NETCONF engine error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Fatal**: framing desync, transport failure, failed hello negotiation or
//!   a closed connection. The session cannot continue and is torn down, which
//!   releases every lock it holds.
//! - **Operation**: unavailable datastore, lock contention, peer-reported
//!   `rpc-error`s, unexpected message-ids. The session stays `Established`.
//!
//! Server-side dispatch converts any error into an [`RpcError`] with
//! [`NetconfError::to_rpc_error`] so that every request gets exactly one reply.

use std::time::Duration;

use thiserror::Error;

use crate::datastore::Datastore;
use crate::protocol::{ErrorTag, RpcError, SessionState};

/// NETCONF engine errors.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// Malformed delimiter or chunk header, or the stream ended mid-message.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Hello exchange failed (no common base version, bad hello).
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The peer violated the protocol (unexpected message, message-id mismatch).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message could not be interpreted as a NETCONF message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// XML document is not well formed.
    #[error("XML error: {0}")]
    Xml(String),

    /// State machine refused a transition.
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// Operation requires an established session.
    #[error("Session not established (state {0:?})")]
    SessionNotEstablished(SessionState),

    /// Session has been closed; no further I/O is performed.
    #[error("Session closed")]
    SessionClosed,

    /// Operation is only meaningful for the other session role.
    #[error("Operation not available for {0} sessions")]
    WrongRole(&'static str),

    /// Datastore capability was not negotiated for this session.
    #[error("Datastore {0} not available: {1} capability not negotiated")]
    DatastoreUnavailable(Datastore, &'static str),

    /// URL source/target used without the :url capability.
    #[error("URL capability not negotiated")]
    UrlUnsupported,

    /// with-defaults parameter used without the :with-defaults capability.
    #[error("with-defaults capability not negotiated")]
    WithDefaultsUnsupported,

    /// Lock is held by another session.
    #[error("Lock on {datastore} denied: held by session {holder}")]
    LockDenied {
        /// Contended datastore.
        datastore: Datastore,
        /// Session currently holding the lock.
        holder: u32,
    },

    /// Unlock attempted by a session that does not hold the lock.
    #[error("Session {session_id} does not hold the lock on {datastore}")]
    NotLockOwner {
        /// Datastore named in the unlock.
        datastore: Datastore,
        /// Session that attempted the unlock.
        session_id: u32,
    },

    /// The peer answered with one or more `rpc-error` elements.
    #[error("RPC failed: {}", describe_rpc_errors(.0))]
    Rpc(Vec<RpcError>),

    /// No reply arrived within the configured timeout.
    #[error("Timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    /// Peer closed the channel.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for NETCONF operations
pub type Result<T> = std::result::Result<T, NetconfError>;

impl NetconfError {
    /// Whether this error terminates the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetconfError::Framing(_)
                | NetconfError::NegotiationFailed(_)
                | NetconfError::ConnectionClosed
                | NetconfError::Io(_)
        )
    }

    /// Convert into the `rpc-error` reported to the peer.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            NetconfError::Rpc(errors) => errors
                .first()
                .cloned()
                .unwrap_or_else(|| RpcError::operation_failed("unspecified failure")),
            NetconfError::LockDenied { holder, .. } => RpcError::lock_denied(*holder),
            NetconfError::NotLockOwner { datastore, .. } => RpcError::operation_failed(format!(
                "lock on {datastore} is not held by this session"
            )),
            NetconfError::DatastoreUnavailable(..)
            | NetconfError::UrlUnsupported
            | NetconfError::WithDefaultsUnsupported => {
                RpcError::new(crate::protocol::ErrorType::Protocol, ErrorTag::OperationNotSupported)
                    .with_message(self.to_string())
            },
            NetconfError::InvalidMessage(msg) | NetconfError::Xml(msg) => {
                RpcError::malformed_message(msg.clone())
            },
            other => RpcError::operation_failed(other.to_string()),
        }
    }
}

fn describe_rpc_errors(errors: &[RpcError]) -> String {
    if errors.is_empty() {
        return "empty rpc-error list".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<quick_xml::Error> for NetconfError {
    fn from(err: quick_xml::Error) -> Self {
        NetconfError::Xml(err.to_string())
    }
}

impl From<toml::de::Error> for NetconfError {
    fn from(err: toml::de::Error) -> Self {
        NetconfError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(NetconfError::Framing("bad".into()).is_fatal());
        assert!(NetconfError::ConnectionClosed.is_fatal());
        assert!(!NetconfError::LockDenied {
            datastore: Datastore::Running,
            holder: 3
        }
        .is_fatal());
        assert!(!NetconfError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_lock_denied_maps_to_rpc_error() {
        let err = NetconfError::LockDenied {
            datastore: Datastore::Running,
            holder: 7,
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.tag, ErrorTag::LockDenied);
        assert_eq!(rpc.info_value("session-id"), Some("7"));
    }

    #[test]
    fn test_unavailable_datastore_maps_to_not_supported() {
        let err = NetconfError::DatastoreUnavailable(Datastore::Candidate, ":candidate");
        assert_eq!(err.to_rpc_error().tag, ErrorTag::OperationNotSupported);
    }
}
