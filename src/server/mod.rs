//! NETCONF server side.
//!
//! Provides what server sessions share:
//! - [`ServerContext`]: datastore backend, lock and session registries
//! - [`SessionRegistry`]: live sessions, for kill-session
//! - [`HandlerRegistry`]: handlers for operations outside the base set
//! - [`handle_request`]: one inbound message in, one reply out
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use netconf::server::ServerContext;
//! use netconf::{MemoryDatastore, Session, SessionConfig};
//!
//! let ctx = ServerContext::new(Arc::new(MemoryDatastore::new()));
//! let mut session = Session::accept_stdio(None, &SessionConfig::default(), ctx).await?;
//! session.serve().await?;
//! ```

mod handlers;
mod registry;
mod state;

pub use handlers::{handle_request, Handled, Outcome};
pub use registry::{HandlerRegistry, HandlerResult, RpcHandler};
pub use state::{allocate_session_id, ServerContext, SessionRegistry, SessionSummary};
