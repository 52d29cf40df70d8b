//! # NETCONF Core - Session Engine
//!
//! NETCONF (RFC 6241) session engine: establishes sessions over any reliable
//! duplex byte stream, negotiates capabilities, frames and correlates XML
//! messages, and arbitrates datastore locks across concurrent sessions.
//!
//! ## Features
//!
//! - **Both framings**: `]]>]]>` end-of-message (base:1.0) and chunked
//!   framing (base:1.1, RFC 6242), switched after the hello exchange
//! - **Capability negotiation**: deterministic version and capability selection
//! - **Client operations**: get, get-config, edit-config, copy-config,
//!   delete-config, lock, unlock, kill-session, close-session, commit,
//!   discard-changes and custom RPCs
//! - **Server dispatch**: exactly one reply per request, handler failures
//!   mapped to `rpc-error`
//! - **Process-wide locking**: datastore locks released on every teardown path
//!
//! ## Architecture
//!
//! ```text
//! ByteChannel ──> MessageFramer ──> Message ──> RpcDispatcher / handle_request
//!                                                    │
//!                                  LockRegistry <────┼────> DatastoreBackend
//!                                                    │
//! ByteChannel <── MessageFramer <── Message (reply) <┘
//! ```
//!
//! | Module      | Responsibility                                           |
//! |-------------|----------------------------------------------------------|
//! | `transport` | [`ByteChannel`], peer metadata, stdio channel, dev TCP   |
//! | `protocol`  | XML, messages, framing, negotiation, [`Session`]         |
//! | `datastore` | datastores, [`LockRegistry`], backend trait              |
//! | `server`    | shared server state, kill-session, request dispatch      |
//! | `config`    | TOML/env configuration, process default capabilities     |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netconf::{Datastore, Session, SessionConfig, TransportInfo, TransportKind};
//!
//! let info = TransportInfo::client("router1", 830, "admin", TransportKind::Ssh);
//! let mut session = Session::connect(info, &SessionConfig::default(), ssh_channel).await?;
//!
//! session.lock(Datastore::Running).await?;
//! let running = session.get_config(Datastore::Running, None, None).await?;
//! session.unlock(Datastore::Running).await?;
//! session.close_session().await?;
//! ```

pub mod config;
pub mod datastore;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use config::{default_capabilities, set_default_capabilities, Config, SessionConfig};
pub use datastore::{
    ConfigSource, ConfigTarget, Datastore, DatastoreBackend, EditOptions, LockRegistry,
    MemoryDatastore,
};
pub use error::{NetconfError, Result};
pub use protocol::{
    uri, CapabilitySet, Message, NegotiatedCaps, ProtocolVersion, ReplyContent, RpcError, Session,
    SessionState, XmlElement,
};
pub use server::ServerContext;
pub use transport::{ByteChannel, StdioChannel, TcpTransport, TransportInfo, TransportKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
