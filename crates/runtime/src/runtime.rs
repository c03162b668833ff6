//! The runtime facade: requests in, results out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use catalog::{Catalog, ToolLoader, ToolRef};
use chrono::{DateTime, Utc};
use policy::Policy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use storage::{SessionId, SessionSlot, SessionStore};
use uuid::Uuid;

use crate::config::BusyPolicy;
use crate::metrics::{Metrics, TokenEstimator};
use crate::privacy::PrivacyFilter;
use crate::sandbox::{self, Run};
use crate::{Error, ErrorKind, RuntimeConfig, validator};

/// A snippet to run, optionally inside a named session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Values seeded as globals before the snippet runs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Json>,
    /// Overrides [`RuntimeConfig::validate_code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
    /// Overrides [`RuntimeConfig::redact_pii`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_privacy: Option<bool>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            session_id: None,
            context: Map::new(),
            validate: None,
            preserve_privacy: None,
        }
    }

    pub fn with_session(mut self, id: impl Into<SessionId>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_privacy(mut self, preserve: bool) -> Self {
        self.preserve_privacy = Some(preserve);
        self
    }
}

/// Outcome of one execution. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub session_id: SessionId,
    pub success: bool,
    /// The snippet's `result` binding; `null` when unbound or on failure.
    pub result: Json,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub stdout: String,
    pub execution_time_seconds: f64,
    pub tools_used: Vec<ToolRef>,
    pub tokens_saved: u64,
    pub started_at: DateTime<Utc>,
}

/// Executes snippets against a fixed catalog under one policy.
///
/// `Runtime` is `Send + Sync`; share it behind an `Arc`. Executions for
/// different sessions run in parallel, executions for one session run one at
/// a time.
#[derive(Debug)]
pub struct Runtime {
    loader: ToolLoader,
    policy: Policy,
    config: RuntimeConfig,
    sessions: SessionStore,
    estimator: TokenEstimator,
    metrics: Metrics,
    privacy: PrivacyFilter,
    history: Mutex<VecDeque<ExecutionResult>>,
}

impl Runtime {
    pub fn new(catalog: Arc<Catalog>, policy: Policy, config: RuntimeConfig) -> Self {
        Self {
            estimator: TokenEstimator::new(&catalog),
            loader: ToolLoader::new(catalog),
            policy,
            config,
            sessions: SessionStore::new(),
            metrics: Metrics::default(),
            privacy: PrivacyFilter::new(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Runtime over `catalog` with a permissive policy and default limits.
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self::new(Arc::new(catalog), Policy::permissive(), RuntimeConfig::default())
    }

    pub fn catalog(&self) -> &Catalog {
        self.loader.catalog()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run a request to completion. Never panics and never returns an error:
    /// every failure is reported inside the result.
    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| SessionId::new(self.config.default_session.clone()));

        if let Some(ttl) = self.config.session_idle_ttl() {
            self.sessions.evict_idle(ttl);
        }

        let checked = if request.validate.unwrap_or(self.config.validate_code) {
            validator::validate(&request.code, self.config.max_code_bytes)
        } else {
            Ok(())
        };
        let (run, tokens_saved) = match checked {
            Ok(()) => self.run_in_session(&self.sessions.slot(&session_id), request),
            Err(e) => (Run::failed(e), 0),
        };
        let mut outcome =
            ExecutionResult::from_run(run, session_id, tokens_saved, started_at, clock);
        if request.preserve_privacy.unwrap_or(self.config.redact_pii) {
            self.redact(&mut outcome);
        }

        if let Some(message) = &outcome.error {
            tracing::info!(
                session = %outcome.session_id,
                execution = %outcome.execution_id,
                error = %message,
                "execution failed"
            );
        } else {
            tracing::info!(
                session = %outcome.session_id,
                execution = %outcome.execution_id,
                seconds = outcome.execution_time_seconds,
                tokens_saved = outcome.tokens_saved,
                tools = outcome.tools_used.len(),
                "execution finished"
            );
        }

        self.metrics.record(outcome.tokens_saved, outcome.success);
        self.remember(outcome.clone());
        outcome
    }

    /// Shorthand for [`Runtime::execute`].
    pub fn execute_code(&self, code: &str, session: Option<&str>) -> ExecutionResult {
        let mut request = ExecutionRequest::new(code);
        if let Some(id) = session {
            request = request.with_session(id);
        }
        self.execute(&request)
    }

    /// Run on a blocking worker so async callers are not stalled.
    pub async fn execute_async(self: Arc<Self>, request: ExecutionRequest) -> ExecutionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| SessionId::new(self.config.default_session.clone()));

        match tokio::task::spawn_blocking(move || self.execute(&request)).await {
            Ok(result) => result,
            Err(e) => ExecutionResult::from_run(
                Run::failed(Error::Crashed(e.to_string())),
                session_id,
                0,
                started_at,
                clock,
            ),
        }
    }

    /// Restore PII that redaction replaced with tokens.
    pub fn detokenize(&self, text: &str) -> String {
        self.privacy.detokenize(text)
    }

    /// Tokens saved by every successful execution so far.
    pub fn get_total_tokens_saved(&self) -> u64 {
        self.metrics.total_tokens_saved()
    }

    pub fn executions(&self) -> u64 {
        self.metrics.executions()
    }

    pub fn failures(&self) -> u64 {
        self.metrics.failures()
    }

    /// The most recent results, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Run under the session lease and fold the outcome into the session.
    /// Returns the run and the tokens it saved.
    fn run_in_session(&self, slot: &SessionSlot, request: &ExecutionRequest) -> (Run, u64) {
        let mut session = match self.config.busy_policy {
            BusyPolicy::Wait => slot.acquire(),
            BusyPolicy::Reject => match slot.try_acquire() {
                Some(lease) => lease,
                None => {
                    let id = slot.id();
                    tracing::warn!(session = %id, "rejected call to busy session");
                    return (Run::failed(Error::SessionBusy(id.to_string())), 0);
                }
            },
        };

        let run = sandbox::run(
            &request.code,
            &request.context,
            &mut session,
            &self.loader,
            &self.policy,
            &self.config,
        );
        let saved = match &run.result {
            Ok(result) => self.estimator.estimate(
                self.loader.catalog(),
                &run.tools_used,
                run.raw_output_chars,
                result,
            ),
            Err(_) => 0,
        };
        session.cumulative_tokens_saved += saved;
        session.executions += 1;
        session.touch();
        (run, saved)
    }

    fn redact(&self, outcome: &mut ExecutionResult) {
        outcome.result = self.privacy.redact(&outcome.result);
        outcome.stdout = self.privacy.tokenize(&outcome.stdout);
        if let Some(error) = &mut outcome.error {
            *error = self.privacy.tokenize(error);
        }
    }

    fn remember(&self, result: ExecutionResult) {
        if self.config.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.config.history_limit {
            history.pop_front();
        }
        history.push_back(result);
    }
}

impl ExecutionResult {
    fn from_run(
        run: Run,
        session_id: SessionId,
        tokens_saved: u64,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Self {
        let (success, result, error, error_kind) = match run.result {
            Ok(result) => (true, result, None, None),
            Err(err) => (false, Json::Null, Some(err.to_string()), Some(err.kind())),
        };
        Self {
            execution_id: Uuid::new_v4(),
            session_id,
            success,
            result,
            error,
            error_kind,
            stdout: run.stdout,
            execution_time_seconds: clock.elapsed().as_secs_f64(),
            tools_used: run.tools_used,
            tokens_saved,
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        Runtime::with_catalog(catalog::maritime::catalog().unwrap())
    }

    #[test]
    fn runtime_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Runtime>();
    }

    #[test]
    fn unbound_result_is_null_but_successful() {
        let out = runtime().execute_code("x = 1", None);
        assert!(out.success);
        assert_eq!(out.result, Json::Null);
        assert_eq!(out.session_id.as_str(), "default");
        assert!(out.error.is_none());
    }

    #[test]
    fn failures_report_kind_and_message() {
        let out = runtime().execute_code("result = undefined_thing", None);
        assert!(!out.success);
        assert_eq!(out.result, Json::Null);
        assert_eq!(out.error_kind, Some(ErrorKind::RuntimeError));
        assert_eq!(
            out.error.as_deref(),
            Some("NameError: name 'undefined_thing' is not defined (line 1)")
        );
        assert_eq!(out.tokens_saved, 0);
    }

    #[test]
    fn syntax_errors_are_classified() {
        let out = runtime().execute_code("def broken(:\n    pass", None);
        assert_eq!(out.error_kind, Some(ErrorKind::SnippetSyntaxError));
        assert!(out.error.unwrap().starts_with("SyntaxError: "));
    }

    #[test]
    fn oversized_code_is_refused_before_parsing() {
        let config = RuntimeConfig {
            max_code_bytes: 10,
            ..RuntimeConfig::default()
        };
        let rt = Runtime::new(
            Arc::new(catalog::maritime::catalog().unwrap()),
            Policy::permissive(),
            config,
        );
        let out = rt.execute_code("result = 'way too long'", None);
        assert_eq!(out.error_kind, Some(ErrorKind::SnippetSyntaxError));
    }

    #[test]
    fn history_is_bounded() {
        let config = RuntimeConfig {
            history_limit: 2,
            ..RuntimeConfig::default()
        };
        let rt = Runtime::new(
            Arc::new(catalog::maritime::catalog().unwrap()),
            Policy::permissive(),
            config,
        );
        for i in 0..3 {
            rt.execute_code(&format!("result = {i}"), None);
        }
        let history = rt.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result, serde_json::json!(1));
        assert_eq!(history[1].result, serde_json::json!(2));
        assert_eq!(rt.executions(), 3);
    }

    #[test]
    fn forbidden_calls_are_refused_unless_validation_is_off() {
        let rt = runtime();
        let out = rt.execute_code("result = eval('1 + 1')", Some("v"));
        assert_eq!(out.error_kind, Some(ErrorKind::CapabilityError));
        assert!(out.error.unwrap().contains("eval("));
        // Refused snippets never reach the session.
        assert!(rt.sessions().get(&SessionId::from("v")).is_none());

        let request = ExecutionRequest::new("result = eval('1 + 1')").with_validation(false);
        let out = rt.execute(&request);
        assert!(out.error.unwrap().starts_with("NameError"));
    }

    #[test]
    fn context_values_are_globals() {
        let request = ExecutionRequest::new(
            "def over(v):\n    return v['length'] > min_length\nresult = [v['name'] for v in fleet if over(v)]",
        )
        .with_context("min_length", 100)
        .with_context(
            "fleet",
            serde_json::json!([{"name": "A", "length": 80}, {"name": "B", "length": 140}]),
        );
        let out = runtime().execute(&request);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.result, serde_json::json!(["B"]));
    }

    #[test]
    fn requests_deserialize_with_optional_fields() {
        let request: ExecutionRequest =
            serde_json::from_str(r#"{"code": "result = n", "context": {"n": 3}}"#).unwrap();
        assert_eq!(request.context["n"], 3);
        assert_eq!(request.preserve_privacy, None);
        assert_eq!(runtime().execute(&request).result, serde_json::json!(3));
    }

    #[test]
    fn privacy_redacts_every_output_channel() {
        let rt = runtime();
        let request = ExecutionRequest::new(
            "print('mail ops@fleet.example')\nresult = {'who': 'ops@fleet.example', 'password': 'hunter2'}\nraise ValueError('ssn 123-45-6789')",
        )
        .with_privacy(true);
        let out = rt.execute(&request);
        assert!(!out.success);
        assert!(!out.stdout.contains("ops@"), "{}", out.stdout);
        let error = out.error.unwrap();
        assert!(!error.contains("123-45-6789"), "{error}");
        assert!(rt.detokenize(&error).contains("123-45-6789"));
        assert_eq!(rt.detokenize(out.stdout.trim()), "mail ops@fleet.example");

        let out = rt.execute(
            &ExecutionRequest::new("result = {'who': 'ops@fleet.example', 'password': 'hunter2'}")
                .with_privacy(true),
        );
        assert_eq!(out.result["password"], crate::REDACTED);
        let who = out.result["who"].as_str().unwrap();
        assert!(who.starts_with("token_") && who.ends_with("@fleet.example"), "{who}");

        let plain = rt.execute_code("result = 'ops@fleet.example'", None);
        assert_eq!(plain.result, "ops@fleet.example");
    }

    #[test]
    fn results_serialize_with_snake_case_fields() {
        let out = runtime().execute_code("result = {'ok': True}", Some("s"));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["session_id"], "s");
        assert_eq!(json["result"]["ok"], true);
        assert!(json["execution_time_seconds"].as_f64().unwrap() >= 0.0);
        assert!(json["error_kind"].is_null());
    }
}
