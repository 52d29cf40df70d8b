//! Process-wide datastore lock arbitration.
//!
//! At most one session holds the lock on a datastore at any time. The
//! registry lives outside of [`Session`](crate::Session) so that contention
//! is visible across every session served by the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;

use super::Datastore;
use crate::error::{NetconfError, Result};

lazy_static! {
    static ref GLOBAL: Arc<LockRegistry> = Arc::new(LockRegistry::new());
}

/// Datastore lock table shared by all sessions.
#[derive(Debug, Default)]
pub struct LockRegistry {
    /// Datastore -> owning session id
    holders: Mutex<HashMap<Datastore, u32>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by the whole process.
    pub fn global() -> Arc<LockRegistry> {
        Arc::clone(&GLOBAL)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Datastore, u32>> {
        // The table holds plain ids, a panic mid-update cannot corrupt it.
        self.holders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Take the lock on `datastore` for `session_id`.
    pub fn acquire(&self, datastore: Datastore, session_id: u32) -> Result<()> {
        let mut table = self.table();
        match table.get(&datastore) {
            Some(&holder) => {
                tracing::warn!(%datastore, session_id, holder, "lock denied");
                Err(NetconfError::LockDenied { datastore, holder })
            },
            None => {
                table.insert(datastore, session_id);
                tracing::debug!(%datastore, session_id, "lock acquired");
                Ok(())
            },
        }
    }

    /// Drop the lock on `datastore`, only if `session_id` holds it.
    pub fn release(&self, datastore: Datastore, session_id: u32) -> Result<()> {
        let mut table = self.table();
        match table.get(&datastore) {
            Some(&holder) if holder == session_id => {
                table.remove(&datastore);
                tracing::debug!(%datastore, session_id, "lock released");
                Ok(())
            },
            _ => Err(NetconfError::NotLockOwner {
                datastore,
                session_id,
            }),
        }
    }

    /// Drop every lock held by `session_id`. Returns the released datastores.
    pub fn release_all(&self, session_id: u32) -> Vec<Datastore> {
        let mut table = self.table();
        let mut released: Vec<Datastore> = table
            .iter()
            .filter(|(_, &holder)| holder == session_id)
            .map(|(&ds, _)| ds)
            .collect();
        released.sort();
        for ds in &released {
            table.remove(ds);
        }
        if !released.is_empty() {
            tracing::info!(session_id, ?released, "released session locks");
        }
        released
    }

    /// Current holder of a datastore lock.
    pub fn holder(&self, datastore: Datastore) -> Option<u32> {
        self.table().get(&datastore).copied()
    }

    /// Fail with `LockDenied` if another session holds `datastore`.
    pub fn check_writable(&self, datastore: Datastore, session_id: u32) -> Result<()> {
        match self.holder(datastore) {
            Some(holder) if holder != session_id => {
                Err(NetconfError::LockDenied { datastore, holder })
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_acquire_and_deny() {
        let locks = LockRegistry::new();
        locks.acquire(Datastore::Running, 1).unwrap();

        match locks.acquire(Datastore::Running, 2) {
            Err(NetconfError::LockDenied { holder, .. }) => assert_eq!(holder, 1),
            other => panic!("expected LockDenied, got {other:?}"),
        }
        // Different datastore is independent
        locks.acquire(Datastore::Candidate, 2).unwrap();
    }

    #[test]
    fn test_release_requires_owner() {
        let locks = LockRegistry::new();
        locks.acquire(Datastore::Startup, 1).unwrap();
        assert!(matches!(
            locks.release(Datastore::Startup, 2),
            Err(NetconfError::NotLockOwner { .. })
        ));
        locks.release(Datastore::Startup, 1).unwrap();
        assert!(locks.release(Datastore::Startup, 1).is_err());
    }

    #[test]
    fn test_teardown_scenario() {
        let locks = LockRegistry::new();
        locks.acquire(Datastore::Running, 10).unwrap();
        assert!(locks.acquire(Datastore::Running, 11).is_err());

        assert_eq!(locks.release_all(10), vec![Datastore::Running]);
        locks.acquire(Datastore::Running, 11).unwrap();
        assert_eq!(locks.holder(Datastore::Running), Some(11));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let locks = Arc::new(LockRegistry::new());
        let handles: Vec<_> = (1..=16)
            .map(|id| {
                let locks = Arc::clone(&locks);
                thread::spawn(move || locks.acquire(Datastore::Running, id).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire(usize, u32),
        Release(usize, u32),
        ReleaseAll(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 1..5u32).prop_map(|(d, s)| Op::Acquire(d, s)),
            (0..3usize, 1..5u32).prop_map(|(d, s)| Op::Release(d, s)),
            (1..5u32).prop_map(Op::ReleaseAll),
        ]
    }

    proptest! {
        #[test]
        fn prop_single_holder(ops in proptest::collection::vec(op(), 0..64)) {
            let locks = LockRegistry::new();
            let mut model: HashMap<Datastore, u32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Acquire(d, s) => {
                        let ds = Datastore::ALL[d];
                        let ok = locks.acquire(ds, s).is_ok();
                        prop_assert_eq!(ok, !model.contains_key(&ds));
                        model.entry(ds).or_insert(s);
                    },
                    Op::Release(d, s) => {
                        let ds = Datastore::ALL[d];
                        let ok = locks.release(ds, s).is_ok();
                        prop_assert_eq!(ok, model.get(&ds) == Some(&s));
                        if ok {
                            model.remove(&ds);
                        }
                    },
                    Op::ReleaseAll(s) => {
                        locks.release_all(s);
                        model.retain(|_, holder| *holder != s);
                    },
                }
                for ds in Datastore::ALL {
                    prop_assert_eq!(locks.holder(ds), model.get(&ds).copied());
                }
            }
        }
    }
}
