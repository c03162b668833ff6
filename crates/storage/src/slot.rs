//! Per-session mutual exclusion.
//!
//! Each session owns a ticket gate: callers take a ticket on arrival and are
//! served strictly in ticket order, so executions against one session run one
//! at a time and in submission order. Different sessions never share a lock.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{SessionId, SessionState};

#[derive(Debug, Default)]
struct Turn {
    next_ticket: u64,
    now_serving: u64,
}

/// One session's state behind its ticket gate.
#[derive(Debug)]
pub struct SessionSlot {
    id: SessionId,
    turn: Mutex<Turn>,
    turn_changed: Condvar,
    state: Mutex<SessionState>,
}

impl SessionSlot {
    pub fn new(state: SessionState) -> Self {
        Self {
            id: state.id.clone(),
            turn: Mutex::new(Turn::default()),
            turn_changed: Condvar::new(),
            state: Mutex::new(state),
        }
    }

    /// Wait for this caller's turn and take exclusive access.
    pub fn acquire(&self) -> SessionLease<'_> {
        let mut turn = lock(&self.turn);
        let ticket = turn.next_ticket;
        turn.next_ticket += 1;
        while turn.now_serving != ticket {
            turn = self
                .turn_changed
                .wait(turn)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(turn);

        SessionLease {
            slot: self,
            state: lock(&self.state),
        }
    }

    /// Take exclusive access only if nobody holds or awaits it.
    pub fn try_acquire(&self) -> Option<SessionLease<'_>> {
        let mut turn = lock(&self.turn);
        if turn.next_ticket != turn.now_serving {
            return None;
        }
        turn.next_ticket += 1;
        drop(turn);

        Some(SessionLease {
            slot: self,
            state: lock(&self.state),
        })
    }

    /// Whether a lease is held or queued.
    pub fn is_busy(&self) -> bool {
        let turn = lock(&self.turn);
        turn.next_ticket != turn.now_serving
    }

    /// Never waits on the lease.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Copy of the current state. Blocks while an execution holds the lease.
    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    fn release(&self) {
        let mut turn = lock(&self.turn);
        turn.now_serving += 1;
        drop(turn);
        self.turn_changed.notify_all();
    }
}

/// Exclusive access to one session's state.
pub struct SessionLease<'a> {
    slot: &'a SessionSlot,
    state: MutexGuard<'a, SessionState>,
}

impl Deref for SessionLease<'_> {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}

impl DerefMut for SessionLease<'_> {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// Lock, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("recovered poisoned session lock");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn slot() -> Arc<SessionSlot> {
        Arc::new(SessionSlot::new(SessionState::new("s".into())))
    }

    #[test]
    fn try_acquire_fails_while_leased() {
        let slot = slot();
        let lease = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(lease);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let slot = slot();
        let first = slot.acquire();

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let slot = Arc::clone(&slot);
            handles.push(thread::spawn(move || {
                let mut lease = slot.acquire();
                lease.executions = lease.executions * 10 + i + 1;
            }));
            // Give each thread time to take its ticket before the next one.
            thread::sleep(Duration::from_millis(50));
        }

        drop(first);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(slot.snapshot().executions, 1234);
    }

    #[test]
    fn id_is_readable_while_leased() {
        let slot = slot();
        let _lease = slot.acquire();
        assert_eq!(slot.id().as_str(), "s");
    }

    #[test]
    fn lease_mutations_are_visible_afterwards() {
        let slot = slot();
        {
            let mut lease = slot.acquire();
            lease.save("k", serde_json::json!(true));
        }
        assert_eq!(slot.snapshot().state["k"], serde_json::json!(true));
    }
}
