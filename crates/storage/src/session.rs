//! Session types.

use std::collections::BTreeMap;

use catalog::ToolRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the session used when a request carries no id.
pub const DEFAULT_SESSION: &str = "default";

/// Identifier of a session. Any non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Everything a session carries between executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    /// Values written by `save_state`, last write wins.
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
    #[serde(default)]
    pub cumulative_tokens_saved: u64,
    /// Every tool invocation across the session's history, in call order.
    #[serde(default)]
    pub tool_invocations: Vec<ToolRef>,
    #[serde(default)]
    pub executions: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: BTreeMap::new(),
            cumulative_tokens_saved: 0,
            tool_invocations: Vec::new(),
            executions: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn save(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// The stored value, or `default` when `key` was never saved.
    pub fn load(&self, key: &str, default: Value) -> Value {
        self.state.get(key).cloned().unwrap_or(default)
    }

    pub fn record_invocation(&mut self, tool: ToolRef) {
        self.tool_invocations.push(tool);
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            keys: self.state.len(),
            executions: self.executions,
            tool_invocations: self.tool_invocations.len(),
            cumulative_tokens_saved: self.cumulative_tokens_saved,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }
}

/// Lightweight view of a session for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub keys: usize,
    pub executions: u64,
    pub tool_invocations: usize,
    pub cumulative_tokens_saved: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_session_id() {
        assert_eq!(SessionId::default().as_str(), "default");
    }

    #[test]
    fn save_then_load() {
        let mut s = SessionState::new("s1".into());
        s.save("favs", json!([1, 2, 3]));
        assert_eq!(s.load("favs", Value::Null), json!([1, 2, 3]));
    }

    #[test]
    fn missing_key_returns_default() {
        let s = SessionState::new("s1".into());
        assert_eq!(s.load("nope", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn last_write_wins() {
        let mut s = SessionState::new("s1".into());
        s.save("k", json!(1));
        s.save("k", json!(2));
        assert_eq!(s.load("k", Value::Null), json!(2));
        assert_eq!(s.summary().keys, 1);
    }
}
