//! Session state storage for the mcpx runtime.
//!
//! Each session is a small key/value map that survives between otherwise
//! independent snippet executions, plus the bookkeeping the runtime keeps
//! about it (tool invocations, token savings, execution count).
//!
//! # Core Concepts
//!
//! ## SessionStore
//!
//! The [`SessionStore`] maps session ids to [`SessionSlot`]s. Sessions are
//! created lazily the first time an id is used and live until the process
//! exits or the host calls [`SessionStore::evict_idle`].
//!
//! ## SessionSlot
//!
//! A [`SessionSlot`] serializes access to one session. Callers are served in
//! arrival order through [`SessionSlot::acquire`], or turned away with
//! [`SessionSlot::try_acquire`] when the session is busy.
//!
//! ## Snapshots
//!
//! The whole store can be written to and restored from a JSON file so that a
//! CLI can carry state across process runs. Nothing here talks to a database.
//!
//! # Example
//!
//! ```
//! use storage::{SessionId, SessionStore};
//! use serde_json::json;
//!
//! let store = SessionStore::new();
//! let slot = store.slot(&SessionId::from("s1"));
//! {
//!     let mut session = slot.acquire();
//!     session.save("favs", json!([1, 2, 3]));
//! }
//! assert_eq!(slot.snapshot().load("favs", json!([])), json!([1, 2, 3]));
//! ```

mod error;
mod session;
mod slot;
mod store;

pub use error::{Error, Result};
pub use session::{DEFAULT_SESSION, SessionId, SessionState, SessionSummary};
pub use slot::{SessionLease, SessionSlot};
pub use store::SessionStore;
