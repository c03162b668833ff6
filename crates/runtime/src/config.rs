//! Runtime limits and session behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use storage::DEFAULT_SESSION;

/// What to do when a call arrives for a session that is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Queue behind the running call; calls are served in arrival order.
    #[default]
    Wait,
    /// Fail fast with `SessionBusyError` without running the snippet.
    Reject,
}

/// The `[runtime]` table of `mcpx.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timeout_ms: u64,
    /// Optional cap on interpreter steps, on top of the wall-clock limit.
    pub max_steps: Option<u64>,
    pub max_output_bytes: usize,
    pub max_code_bytes: usize,
    pub max_recursion_depth: usize,
    pub max_collection_len: usize,
    pub busy_policy: BusyPolicy,
    pub default_session: String,
    /// Results kept for [`crate::Runtime::history`].
    pub history_limit: usize,
    /// Refuse snippets that mention forbidden calls before parsing them.
    pub validate_code: bool,
    /// Tokenize PII in results, stdout and errors unless a request says otherwise.
    pub redact_pii: bool,
    /// Sessions idle for longer than this are dropped when the next execution starts.
    pub session_idle_ttl_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_steps: None,
            max_output_bytes: 1 << 20,
            max_code_bytes: 100_000,
            max_recursion_depth: 100,
            max_collection_len: 1_000_000,
            busy_policy: BusyPolicy::Wait,
            default_session: DEFAULT_SESSION.to_string(),
            history_limit: 100,
            validate_code: true,
            redact_pii: false,
            session_idle_ttl_secs: None,
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn session_idle_ttl(&self) -> Option<chrono::Duration> {
        let secs = i64::try_from(self.session_idle_ttl_secs?).ok()?;
        chrono::Duration::try_seconds(secs)
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub(crate) fn limits(&self) -> script::Limits {
        script::Limits {
            timeout: Some(self.timeout()),
            max_steps: self.max_steps,
            max_depth: self.max_recursion_depth,
            max_collection_len: self.max_collection_len,
            max_output_bytes: self.max_output_bytes,
            ..script::Limits::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.busy_policy, BusyPolicy::Wait);
        assert_eq!(config.default_session, "default");
        assert_eq!(config.max_code_bytes, 100_000);
        assert!(config.validate_code);
        assert!(!config.redact_pii);
        assert_eq!(config.session_idle_ttl(), None);
    }

    #[test]
    fn idle_ttl_is_whole_seconds() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"session_idle_ttl_secs": 90, "redact_pii": true}"#).unwrap();
        assert_eq!(config.session_idle_ttl(), Some(chrono::Duration::seconds(90)));
        assert!(config.redact_pii);

        let huge = RuntimeConfig {
            session_idle_ttl_secs: Some(u64::MAX),
            ..RuntimeConfig::default()
        };
        assert_eq!(huge.session_idle_ttl(), None);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"timeout_ms": 250, "busy_policy": "reject"}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.history_limit, 100);
    }

    #[test]
    fn limits_follow_config() {
        let config = RuntimeConfig {
            max_steps: Some(10),
            max_recursion_depth: 7,
            ..RuntimeConfig::default()
        };
        let limits = config.limits();
        assert_eq!(limits.max_steps, Some(10));
        assert_eq!(limits.max_depth, 7);
        assert_eq!(limits.timeout, Some(Duration::from_secs(5)));
    }
}
