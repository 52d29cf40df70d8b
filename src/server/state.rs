//! Server state and session management.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use tokio::sync::Notify;

use super::registry::HandlerRegistry;
use crate::datastore::{DatastoreBackend, LockRegistry, MemoryDatastore};
use crate::protocol::{uri, CapabilitySet, WithDefaultsMode};

/// Process-wide session id counter. Ids start at 1 and are never reused.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

lazy_static! {
    static ref GLOBAL: Arc<SessionRegistry> = Arc::new(SessionRegistry::new());
}

/// Allocate a fresh, process-unique session id.
pub fn allocate_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// State shared by every server session of a process.
#[derive(Clone)]
pub struct ServerContext {
    /// Datastore collaborator
    pub backend: Arc<dyn DatastoreBackend>,
    /// Live sessions, for kill-session
    pub sessions: Arc<SessionRegistry>,
    /// Datastore locks
    pub locks: Arc<LockRegistry>,
    /// Handlers for operations outside the base set
    pub handlers: Arc<HandlerRegistry>,
    /// with-defaults basic mode
    pub basic_mode: Option<WithDefaultsMode>,
    /// with-defaults modes accepted besides the basic mode
    pub also_supported: Vec<WithDefaultsMode>,
    /// Creation time
    pub start_time: Instant,
}

impl ServerContext {
    /// Context over `backend` using the process-wide session and lock registries.
    pub fn new(backend: Arc<dyn DatastoreBackend>) -> Self {
        Self {
            backend,
            sessions: SessionRegistry::global(),
            locks: LockRegistry::global(),
            handlers: Arc::new(HandlerRegistry::new()),
            basic_mode: None,
            also_supported: WithDefaultsMode::ALL.to_vec(),
            start_time: Instant::now(),
        }
    }

    /// Context with private registries, isolated from the rest of the process.
    pub fn isolated(backend: Arc<dyn DatastoreBackend>) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            locks: Arc::new(LockRegistry::new()),
            ..Self::new(backend)
        }
    }

    /// Use `handlers` for custom operations.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Set the with-defaults basic mode.
    pub fn with_basic_mode(mut self, mode: Option<WithDefaultsMode>) -> Self {
        self.basic_mode = mode;
        self
    }

    /// Restrict the with-defaults modes accepted besides the basic mode.
    pub fn with_also_supported(mut self, modes: Vec<WithDefaultsMode>) -> Self {
        self.also_supported = modes;
        self
    }

    /// Whether a request may use with-defaults `mode`.
    ///
    /// Without a basic mode every mode is accepted.
    pub fn supports_with_defaults(&self, mode: WithDefaultsMode) -> bool {
        match self.basic_mode {
            None => true,
            Some(basic) => mode == basic || self.also_supported.contains(&mode),
        }
    }

    /// Capabilities a server hello announces for `configured`.
    ///
    /// With a basic mode set, `:with-defaults` carries the `basic-mode` and
    /// `also-supported` parameters.
    pub fn advertised_capabilities(&self, configured: &CapabilitySet) -> CapabilitySet {
        let Some(basic) = self.basic_mode else {
            return configured.clone();
        };
        configured
            .iter()
            .map(|cap| {
                if cap.base_uri() == uri::WITH_DEFAULTS {
                    basic.capability(&self.also_supported)
                } else {
                    cap.clone()
                }
            })
            .collect()
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new(Arc::new(MemoryDatastore::new()))
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("sessions", &self.sessions.count())
            .field("locks", &self.locks)
            .field("handlers", &self.handlers.names())
            .field("basic_mode", &self.basic_mode)
            .field("also_supported", &self.also_supported)
            .finish_non_exhaustive()
    }
}

/// Registry entry for one live session
struct SessionEntry {
    /// Authenticated user
    user: Option<String>,
    /// Wakes the session's request loop when it is killed
    kill: Arc<Notify>,
    /// Registration time
    started: Instant,
}

/// Summary of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id
    pub id: u32,
    /// Authenticated user
    pub user: Option<String>,
    /// Seconds since registration
    pub uptime_secs: u64,
}

/// Live server sessions by id.
#[derive(Default)]
pub struct SessionRegistry {
    /// Active sessions by ID
    sessions: RwLock<HashMap<u32, SessionEntry>>,
}

impl SessionRegistry {
    /// Create new session registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by the whole process.
    pub fn global() -> Arc<SessionRegistry> {
        Arc::clone(&GLOBAL)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u32, SessionEntry>> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u32, SessionEntry>> {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a session and return its kill handle.
    pub fn register(&self, id: u32, user: Option<String>) -> Arc<Notify> {
        let kill = Arc::new(Notify::new());
        let entry = SessionEntry {
            user,
            kill: Arc::clone(&kill),
            started: Instant::now(),
        };
        self.write().insert(id, entry);
        kill
    }

    /// Remove session
    pub fn deregister(&self, id: u32) {
        self.write().remove(&id);
    }

    /// Whether a session is registered.
    pub fn contains(&self, id: u32) -> bool {
        self.read().contains_key(&id)
    }

    /// Terminate session `id`: drop its locks and wake its request loop.
    ///
    /// Returns false if no such session is registered.
    pub fn kill(&self, id: u32, locks: &LockRegistry) -> bool {
        let Some(kill) = self.read().get(&id).map(|e| Arc::clone(&e.kill)) else {
            return false;
        };
        locks.release_all(id);
        // notify_one stores a permit if the session is not currently waiting.
        kill.notify_one();
        tracing::info!(session_id = id, "session killed");
        true
    }

    /// Get session count
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Get all session IDs
    pub fn list_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Summary of a registered session.
    pub fn get(&self, id: u32) -> Option<SessionSummary> {
        self.read().get(&id).map(|entry| SessionSummary {
            id,
            user: entry.user.clone(),
            uptime_secs: entry.started.elapsed().as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Datastore;

    #[test]
    fn test_advertised_with_defaults_capability() {
        let configured: CapabilitySet = [uri::BASE_1_0, uri::WITH_DEFAULTS, uri::CANDIDATE]
            .into_iter()
            .collect();
        let ctx = ServerContext::isolated(Arc::new(MemoryDatastore::new()));
        assert_eq!(ctx.advertised_capabilities(&configured), configured);

        let ctx = ctx
            .with_basic_mode(Some(WithDefaultsMode::Explicit))
            .with_also_supported(vec![WithDefaultsMode::Trim]);
        let advertised = ctx.advertised_capabilities(&configured);
        let uris: Vec<&str> = advertised.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                uri::BASE_1_0,
                "urn:ietf:params:netconf:capability:with-defaults:1.0?basic-mode=explicit&also-supported=trim",
                uri::CANDIDATE,
            ]
        );

        assert!(ctx.supports_with_defaults(WithDefaultsMode::Explicit));
        assert!(ctx.supports_with_defaults(WithDefaultsMode::Trim));
        assert!(!ctx.supports_with_defaults(WithDefaultsMode::ReportAll));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = allocate_session_id();
        let b = allocate_session_id();
        assert!(a > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_and_deregister() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.count(), 0);

        registry.register(3, Some("admin".to_string()));
        registry.register(1, None);
        assert_eq!(registry.list_ids(), vec![1, 3]);
        assert_eq!(registry.get(3).unwrap().user.as_deref(), Some("admin"));

        registry.deregister(3);
        assert!(!registry.contains(3));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_kill_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(!registry.kill(42, &LockRegistry::new()));
    }

    #[tokio::test]
    async fn test_kill_releases_locks_and_notifies() {
        let registry = SessionRegistry::new();
        let locks = LockRegistry::new();
        let kill = registry.register(5, None);
        locks.acquire(Datastore::Running, 5).unwrap();

        assert!(registry.kill(5, &locks));
        assert_eq!(locks.holder(Datastore::Running), None);

        // Permit is stored even though nobody was waiting yet
        tokio::time::timeout(Duration::from_secs(1), kill.notified())
            .await
            .unwrap();
    }
}
