//! Handler registry for operations outside the base protocol.
//!
//! Unknown operation elements are routed by local name to a registered
//! [`RpcHandler`]. Operations without a handler are answered with
//! `operation-not-supported`.
//!
//! # Example
//!
//! ```ignore
//! use netconf::server::{HandlerRegistry, HandlerResult};
//! use netconf::protocol::{ReplyContent, XmlElement};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("reboot", |_session_id: u32, _request: &XmlElement| -> HandlerResult {
//!     Ok(ReplyContent::Ok)
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::{ReplyContent, RpcError, XmlElement};

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<ReplyContent, RpcError>;

/// Trait for custom operation handlers.
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle the operation element sent by session `session_id`.
    fn call(&self, session_id: u32, request: &XmlElement) -> HandlerResult;
}

impl<F> RpcHandler for F
where
    F: Fn(u32, &XmlElement) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, session_id: u32, request: &XmlElement) -> HandlerResult {
        self(session_id, request)
    }
}

/// Registry mapping operation names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    /// Handlers by operation local name.
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for operation `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl RpcHandler) -> &mut Self {
        let name = name.into();
        tracing::debug!(operation = %name, "registered custom operation");
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Handler for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
