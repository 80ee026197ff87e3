//! Live session bookkeeping.
//!
//! Records are created, updated and removed only through the
//! [`SessionGuard`] held by the owning worker; everyone else gets
//! read-only snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Identifier of one session, unique for the lifetime of a fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle of a session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Allocating,
    Active,
    Draining,
    Closed,
}

/// Snapshot of one session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub client_id: i64,
    /// Raw client type code from the hello.
    pub client_type: i32,
    /// Session port, once allocated.
    pub port: Option<u16>,
    pub state: SessionState,
    pub opened_at: Instant,
}

impl SessionRecord {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Registry of live sessions keyed by [`SessionId`].
#[derive(Debug)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    records: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new session in `Allocating` state.
    ///
    /// The record lives exactly as long as the returned guard.
    pub fn open(self: &Arc<Self>, client_id: i64, client_type: i32) -> SessionGuard {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            id,
            SessionRecord {
                id,
                client_id,
                client_type,
                port: None,
                state: SessionState::Allocating,
                opened_at: Instant::now(),
            },
        );
        SessionGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<SessionRecord> {
        self.lock().get(&id).cloned()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sessions in `Active` state.
    pub fn active(&self) -> usize {
        self.lock()
            .values()
            .filter(|record| record.state == SessionState::Active)
            .count()
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn update(&self, id: SessionId, apply: impl FnOnce(&mut SessionRecord)) {
        if let Some(record) = self.lock().get_mut(&id) {
            apply(record);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Write handle for one registry record. Dropping it removes the record.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn set_port(&self, port: u16) {
        self.registry.update(self.id, |record| record.port = Some(port));
    }

    pub fn set_state(&self, state: SessionState) {
        self.registry.update(self.id, |record| record.state = state);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_owns_record_lifetime() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.open(42, 1);
        let id = guard.id();

        let record = registry.get(id).expect("record should exist");
        assert_eq!(record.client_id, 42);
        assert_eq!(record.state, SessionState::Allocating);
        assert_eq!(record.port, None);

        guard.set_port(30001);
        guard.set_state(SessionState::Active);
        let record = registry.get(id).expect("record should exist");
        assert_eq!(record.port, Some(30001));
        assert_eq!(registry.active(), 1);

        drop(guard);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.open(1, 1);
        let second = registry.open(2, 2);
        assert_ne!(first.id(), second.id());

        let ids: Vec<_> = registry.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert_eq!(first.id().to_string(), "session-1");
    }
}
