use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use policy::Policy;
use runtime::{BusyPolicy, ErrorKind, ExecutionRequest, REDACTED, Runtime, RuntimeConfig};
use serde_json::json;
use storage::SessionId;

fn runtime_with(config: RuntimeConfig) -> Runtime {
    let catalog = catalog::maritime::catalog().unwrap();
    Runtime::new(Arc::new(catalog), Policy::permissive(), config)
}

fn runtime() -> Runtime {
    runtime_with(RuntimeConfig::default())
}

#[test]
fn filters_vessels_locally_and_returns_a_summary() {
    let rt = runtime();
    let out = rt.execute_code(
        r#"
        track = load_tool("maritime-data", "vessel_tracking")
        vessels = track(region="istanbul")
        large = [v for v in vessels if v["length"] > 100]
        result = {"count": len(large)}
        "#,
        None,
    );
    assert!(out.success, "{:?}", out.error);
    assert_eq!(out.result, json!({"count": 2}));
    assert_eq!(out.tools_used, vec![catalog::ToolRef::new("maritime-data", "vessel_tracking")]);
    assert!(out.tokens_saved > 0);
    assert_eq!(rt.get_total_tokens_saved(), out.tokens_saved);
}

#[test]
fn missing_tool_fails_the_execution() {
    let out = runtime().execute_code(r#"load_tool("x", "y")"#, None);
    assert!(!out.success);
    assert_eq!(out.result, json!(null));
    assert_eq!(out.error_kind, Some(ErrorKind::ToolNotFoundError));
    assert!(out.error.unwrap().contains("not found"));
    assert_eq!(out.tokens_saved, 0);
}

#[test]
fn state_survives_between_calls_in_one_session() {
    let rt = runtime();
    let first = rt.execute_code(r#"save_state("favs", [1, 2, 3])"#, Some("s1"));
    assert!(first.success, "{:?}", first.error);

    let second = rt.execute_code(r#"result = load_state("favs", [])"#, Some("s1"));
    assert_eq!(second.result, json!([1, 2, 3]));

    let other = rt.execute_code(r#"result = load_state("favs", [])"#, Some("s2"));
    assert_eq!(other.result, json!([]));
}

#[test]
fn runaway_snippet_is_stopped_at_the_timeout() {
    let rt = runtime_with(RuntimeConfig::default().with_timeout(Duration::from_millis(300)));
    let out = rt.execute_code("while True:\n    pass", None);
    assert!(!out.success);
    assert_eq!(out.error_kind, Some(ErrorKind::ExecutionTimeoutError));
    assert!(out.error.unwrap().starts_with("ExecutionTimeoutError"));
    assert!(out.execution_time_seconds >= 0.3);
    assert!(out.execution_time_seconds < 3.0, "took {}", out.execution_time_seconds);
}

#[test]
fn timeout_cannot_be_swallowed() {
    let rt = runtime_with(RuntimeConfig::default().with_timeout(Duration::from_millis(200)));
    let out = rt.execute_code(
        "
        try:
            while True:
                pass
        except Exception:
            result = 'caught'
        ",
        None,
    );
    assert_eq!(out.error_kind, Some(ErrorKind::ExecutionTimeoutError));
    assert_eq!(out.result, json!(null));
}

#[test]
fn state_written_before_a_failure_is_kept() {
    let rt = runtime();
    let out = rt.execute_code(
        "save_state('progress', 1)\nraise ValueError('later step failed')",
        Some("s"),
    );
    assert!(!out.success);
    assert_eq!(out.error_kind, Some(ErrorKind::RuntimeError));

    let next = rt.execute_code("result = load_state('progress')", Some("s"));
    assert_eq!(next.result, json!(1));
}

#[test]
fn print_output_is_captured_even_on_failure() {
    let out = runtime().execute_code("print('checking', 3)\nresult = 1 / 0", None);
    assert!(!out.success);
    assert_eq!(out.stdout, "checking 3\n");
    assert!(out.error.unwrap().starts_with("ZeroDivisionError"));
}

#[test]
fn missing_required_arguments_are_invocation_errors() {
    let out = runtime().execute_code(
        r#"
        check = load_tool("berth-management", "check_availability")
        result = check(marina_id="kalamis")
        "#,
        None,
    );
    assert_eq!(out.error_kind, Some(ErrorKind::ToolInvocationError));
}

#[test]
fn berth_quote_uses_several_servers() {
    let rt = runtime();
    let out = rt.execute_code(
        r#"
        ports = load_tool("maritime-data", "port_info")(country="Turkey", port_type="marina")
        check = load_tool("berth-management", "check_availability")
        quote = check(
            marina_id=ports[0]["name"],
            vessel_length=18,
            start_date="2025-11-10",
            end_date="2025-11-13",
        )
        best = min(quote["berths"], key=lambda b: b["total_cost"])
        result = {"berth": best["berth_id"], "cost": best["total_cost"]}
        "#,
        Some("planner"),
    );
    assert!(out.success, "{:?}", out.error);
    assert_eq!(out.result, json!({"berth": "B-08", "cost": 600}));
    assert_eq!(out.tools_used.len(), 2);

    let session = rt.sessions().state(&SessionId::from("planner")).unwrap();
    assert_eq!(session.tool_invocations.len(), 2);
    assert_eq!(session.executions, 1);
    assert_eq!(session.cumulative_tokens_saved, out.tokens_saved);
}

#[test]
fn denied_tools_raise_capability_errors() {
    let policy = Policy::parse("[deny]\ntools = [\"weather/*\"]\n").unwrap();
    let catalog = catalog::maritime::catalog().unwrap();
    let rt = Runtime::new(Arc::new(catalog), policy, RuntimeConfig::default());

    let out = rt.execute_code(r#"load_tool("weather", "marine_forecast")"#, None);
    assert_eq!(out.error_kind, Some(ErrorKind::CapabilityError));

    let out = rt.execute_code(
        r#"result = len(load_tool("maritime-data", "vessel_tracking")())"#,
        None,
    );
    assert_eq!(out.result, json!(3));
}

#[test]
fn read_only_sessions_have_no_save_state() {
    let catalog = catalog::maritime::catalog().unwrap();
    let rt = Runtime::new(Arc::new(catalog), Policy::read_only(), RuntimeConfig::default());
    let out = rt.execute_code("save_state('k', 1)", None);
    assert!(out.error.unwrap().starts_with("NameError"));
}

#[test]
fn same_session_calls_run_one_at_a_time() {
    let rt = Arc::new(runtime());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let rt = Arc::clone(&rt);
            thread::spawn(move || {
                for _ in 0..10 {
                    let out = rt.execute_code(
                        "save_state('n', load_state('n', 0) + 1)",
                        Some("shared"),
                    );
                    assert!(out.success, "{:?}", out.error);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let out = rt.execute_code("result = load_state('n')", Some("shared"));
    assert_eq!(out.result, json!(40));
}

#[test]
fn busy_session_is_rejected_under_reject_policy() {
    let config = RuntimeConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_busy_policy(BusyPolicy::Reject);
    let rt = Arc::new(runtime_with(config));

    let long = {
        let rt = Arc::clone(&rt);
        thread::spawn(move || rt.execute_code("while True:\n    pass", Some("busy")))
    };
    let id = SessionId::from("busy");
    while !rt.sessions().get(&id).is_some_and(|slot| slot.is_busy()) {
        thread::sleep(Duration::from_millis(5));
    }

    let asked = Instant::now();
    let out = rt.execute_code("result = 1", Some("busy"));
    assert_eq!(out.error_kind, Some(ErrorKind::SessionBusyError));
    assert!(
        asked.elapsed() < Duration::from_millis(500),
        "rejection waited {:?} on the running call",
        asked.elapsed()
    );
    assert!(!long.is_finished());

    let elsewhere = rt.execute_code("result = 1", Some("idle"));
    assert!(elsewhere.success);

    let long = long.join().unwrap();
    assert_eq!(long.error_kind, Some(ErrorKind::ExecutionTimeoutError));
}

#[test]
fn sessions_survive_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");

    let rt = runtime();
    rt.execute_code("save_state('fleet', ['SETUR STAR'])", Some("ops"));
    rt.sessions().save_snapshot(&path).unwrap();

    let restored = runtime();
    assert_eq!(restored.sessions().load_snapshot(&path).unwrap(), 1);
    let out = restored.execute_code("result = load_state('fleet')", Some("ops"));
    assert_eq!(out.result, json!(["SETUR STAR"]));
}

#[test]
fn non_json_result_is_a_serialization_error() {
    let out = runtime().execute_code("result = len", None);
    assert_eq!(out.error_kind, Some(ErrorKind::StateSerializationError));
}

#[tokio::test]
async fn executes_from_async_callers() {
    let rt = Arc::new(runtime());
    let request = ExecutionRequest::new("result = sorted(list_servers())").with_session("async");
    let out = Arc::clone(&rt).execute_async(request).await;
    assert!(out.success, "{:?}", out.error);
    assert_eq!(
        out.result,
        json!(["berth-management", "maritime-data", "weather"])
    );
    assert_eq!(rt.executions(), 1);
}

#[test]
fn token_total_counts_only_successful_runs() {
    let rt = runtime();
    let snippets = [
        r#"result = len(load_tool("maritime-data", "vessel_tracking")())"#,
        r#"load_tool("maritime-data", "vessel_tracking")()
result = 1 / 0"#,
        r#"result = [p["name"] for p in load_tool("maritime-data", "port_info")(country="Turkey")]"#,
        r#"load_tool("nowhere", "nothing")"#,
        r#"result = {"servers": len(list_servers())}"#,
    ];

    let mut expected = 0;
    let mut previous = rt.get_total_tokens_saved();
    for code in snippets {
        let out = rt.execute_code(code, Some("mixed"));
        if out.success {
            expected += out.tokens_saved;
        } else {
            assert_eq!(out.tokens_saved, 0, "{code}");
        }
        let total = rt.get_total_tokens_saved();
        assert!(total >= previous);
        assert_eq!(total, expected);
        previous = total;
    }
    assert!(expected > 0);
    assert_eq!(rt.executions(), 5);
    assert_eq!(rt.failures(), 2);

    let session = rt.sessions().state(&SessionId::from("mixed")).unwrap();
    assert_eq!(session.cumulative_tokens_saved, expected);
}

#[test]
fn idle_sessions_expire_before_the_next_run() {
    let config = RuntimeConfig {
        session_idle_ttl_secs: Some(60),
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(config);
    rt.execute_code("save_state('k', 1)", Some("stale"));
    rt.execute_code("save_state('k', 2)", Some("recent"));
    {
        let slot = rt.sessions().get(&SessionId::from("stale")).unwrap();
        slot.acquire().last_active_at = chrono::Utc::now() - chrono::Duration::minutes(5);
    }

    let out = rt.execute_code("result = load_state('k')", Some("recent"));
    assert_eq!(out.result, json!(2));
    assert!(rt.sessions().get(&SessionId::from("stale")).is_none());

    let out = rt.execute_code("result = load_state('k', 'gone')", Some("stale"));
    assert_eq!(out.result, json!("gone"));
}

#[test]
fn privacy_tokenizes_tool_data() {
    let config = RuntimeConfig {
        redact_pii: true,
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(config);
    let out = rt.execute_code(
        r#"
        vessels = load_tool("maritime-data", "vessel_tracking")()
        ports = load_tool("maritime-data", "port_info")(country="Turkey")
        print(ports[0]["contact"]["email"])
        result = {
            "ids": [[v["imo"], v["mmsi"]] for v in vessels],
            "contact": ports[0]["contact"]["email"],
            "secret_key": "k-123",
        }
        "#,
        None,
    );
    assert!(out.success, "{:?}", out.error);
    assert!(out.tokens_saved > 0);
    assert_eq!(out.result["secret_key"], REDACTED);

    let ids = &out.result["ids"][0];
    assert!(ids[0].as_str().unwrap().starts_with("[IMO_NUMBER_"), "{ids}");
    assert!(ids[1].as_str().unwrap().starts_with("[MMSI_"), "{ids}");
    assert!(rt.detokenize(ids[0].as_str().unwrap()).starts_with("IMO98765"));

    let contact = out.result["contact"].as_str().unwrap();
    assert!(contact.starts_with("token_"));
    assert_eq!(out.stdout.trim(), contact);
    assert!(rt.detokenize(contact).starts_with("info@"));

    let opted_out = rt.execute(
        &ExecutionRequest::new(r#"result = load_tool("maritime-data", "vessel_tracking")()[0]["mmsi"]"#)
            .with_privacy(false),
    );
    assert_eq!(opted_out.result, json!("271234567"));
}

#[tokio::test]
async fn async_requests_carry_context() {
    let rt = Arc::new(runtime());
    let request = ExecutionRequest::new(
        r#"result = [v["name"] for v in load_tool("maritime-data", "vessel_tracking")(region=region)]"#,
    )
    .with_context("region", "istanbul");
    let out = rt.execute_async(request).await;
    assert!(out.success, "{:?}", out.error);
    assert!(!out.result.as_array().unwrap().is_empty());
}
