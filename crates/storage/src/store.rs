//! In-memory session registry with JSON snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::slot::lock;
use crate::{Error, Result, SessionId, SessionSlot, SessionState, SessionSummary};

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot format.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    sessions: Vec<SessionState>,
}

/// Registry of live sessions.
///
/// The map itself is only locked long enough to find or create a slot;
/// executions then contend on their own session's gate.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `id`, created on first use.
    pub fn slot(&self, id: &SessionId) -> Arc<SessionSlot> {
        let mut sessions = lock(&self.sessions);
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(session = %id, "created session");
            Arc::new(SessionSlot::new(SessionState::new(id.clone())))
        }))
    }

    /// The slot for `id` if the session exists.
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Copy of a session's state.
    pub fn state(&self, id: &SessionId) -> Result<SessionState> {
        self.get(id)
            .map(|slot| slot.snapshot())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Summaries of every session, most recently active first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let slots: Vec<_> = lock(&self.sessions).values().cloned().collect();
        let mut summaries: Vec<_> = slots.iter().map(|s| s.snapshot().summary()).collect();
        summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        summaries
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle for longer than `max_idle`. Sessions with a running
    /// or queued execution are kept, and the check never waits on a lease.
    /// Returns the evicted ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = lock(&self.sessions);
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, slot)| {
                slot.try_acquire()
                    .is_some_and(|lease| lease.last_active_at < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            sessions.remove(id);
            tracing::info!(session = %id, "evicted idle session");
        }
        stale
    }

    /// Write every session to a JSON file.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let slots: Vec<_> = lock(&self.sessions).values().cloned().collect();
        let mut sessions: Vec<SessionState> = slots.iter().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            sessions,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "saved session snapshot");
        Ok(())
    }

    /// Restore sessions from a JSON file written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// Restored sessions replace live ones with the same id. A missing file
    /// is not an error. Returns the number of sessions restored.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }

        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let count = snapshot.sessions.len();

        for state in snapshot.sessions {
            let slot = self.slot(&state.id);
            let mut lease = slot.acquire();
            *lease = state;
        }
        tracing::debug!(path = %path.display(), count, "loaded session snapshot");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ToolRef;
    use serde_json::json;

    #[test]
    fn sessions_are_created_lazily() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        let id = SessionId::from("s1");
        assert!(store.get(&id).is_none());
        store.slot(&id);
        assert_eq!(store.len(), 1);
        store.slot(&id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn state_is_isolated_between_sessions() {
        let store = SessionStore::new();
        store.slot(&"a".into()).acquire().save("secret", json!(42));
        let b = store.slot(&"b".into()).snapshot();
        assert_eq!(b.load("secret", json!(null)), json!(null));
    }

    #[test]
    fn state_of_unknown_session_is_not_found() {
        let store = SessionStore::new();
        assert!(matches!(store.state(&"ghost".into()), Err(Error::NotFound(_))));
    }

    #[test]
    fn evicts_only_idle_sessions() {
        let store = SessionStore::new();
        {
            let slot = store.slot(&"old".into());
            let mut lease = slot.acquire();
            lease.last_active_at = Utc::now() - Duration::hours(2);
        }
        store.slot(&"fresh".into());

        let evicted = store.evict_idle(Duration::hours(1));
        assert_eq!(evicted, vec![SessionId::from("old")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_skips_leased_sessions() {
        let store = SessionStore::new();
        let slot = store.slot(&"running".into());
        let mut lease = slot.acquire();
        lease.last_active_at = Utc::now() - Duration::hours(2);

        assert!(store.evict_idle(Duration::hours(1)).is_empty());
        drop(lease);
        assert_eq!(store.evict_idle(Duration::hours(1)).len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::new();
        {
            let slot = store.slot(&"s1".into());
            let mut lease = slot.acquire();
            lease.save("favs", json!([1, 2, 3]));
            lease.record_invocation(ToolRef::new("maritime-data", "vessel_tracking"));
            lease.cumulative_tokens_saved = 99;
        }
        store.save_snapshot(&path).unwrap();

        let restored = SessionStore::new();
        assert_eq!(restored.load_snapshot(&path).unwrap(), 1);
        let state = restored.state(&"s1".into()).unwrap();
        assert_eq!(state.load("favs", json!(null)), json!([1, 2, 3]));
        assert_eq!(state.tool_invocations.len(), 1);
        assert_eq!(state.cumulative_tokens_saved, 99);
    }

    #[test]
    fn missing_snapshot_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new();
        assert_eq!(store.load_snapshot(dir.path().join("absent.json")).unwrap(), 0);
    }
}
