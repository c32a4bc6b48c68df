//! End-to-end engine scenarios
//!
//! Each test drives a complete workflow through `Engine::execute` and
//! asserts on the final output or error surface.

mod common;

use common::{bare_engine, engine_with, workflow, Behavior, CountingExecutor};
use flowgate::{CancelToken, EngineError, RequestContext, RunKind};
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn target_envelope_is_unwrapped() {
    let doc = r#"
metadata:
  name: unwrap
  targetActionID: r
resources:
  - actionID: r
    run:
      apiResponse:
        success: true
        response:
          result: ok
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"result": "ok"}));
}

#[tokio::test]
async fn retry_exhaustion_reports_attempt_count() {
    let doc = r#"
metadata:
  name: retry
  targetActionID: flaky
resources:
  - actionID: flaky
    run:
      exec:
        command: irrelevant
      onError:
        action: retry
        maxRetries: 2
"#;
    let (executor, calls) =
        CountingExecutor::new(RunKind::Exec, Behavior::Fail("boom".to_string()));
    let engine = engine_with(vec![executor]);

    let err = engine.execute(&workflow(doc), None).await.unwrap_err();
    assert!(
        err.to_string().contains("all 2 retry attempts failed"),
        "unexpected error: {}",
        err
    );
    assert!(err.to_string().contains("boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_recovers_when_an_attempt_succeeds() {
    let doc = r#"
metadata:
  name: retry-recover
  targetActionID: flaky
resources:
  - actionID: flaky
    run:
      exec:
        command: irrelevant
      onError:
        action: retry
        maxRetries: 3
"#;
    let (executor, calls) = CountingExecutor::new(
        RunKind::Exec,
        Behavior::FailThenSucceed {
            failures: 2,
            value: json!("recovered"),
        },
    );
    let engine = engine_with(vec![executor]);

    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn continue_with_fallback_substitutes_output() {
    let doc = r#"
metadata:
  name: fallback
  targetActionID: fragile
resources:
  - actionID: fragile
    run:
      exec:
        command: irrelevant
      onError:
        action: continue
        fallback: FB
"#;
    let (executor, _) = CountingExecutor::new(RunKind::Exec, Behavior::Fail("down".to_string()));
    let engine = engine_with(vec![executor]);

    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!("FB"));
}

#[tokio::test]
async fn items_fan_out_aggregates_envelopes_in_order() {
    let doc = r#"
metadata:
  name: fanout
  targetActionID: each
resources:
  - actionID: each
    items: [a, b, c]
    run:
      apiResponse:
        success: true
        response:
          item: "{{get('item')}}"
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();

    let envelopes = output.as_array().expect("fan-out output is a sequence");
    assert_eq!(envelopes.len(), 3);
    let items: Vec<&str> = envelopes
        .iter()
        .map(|e| e["data"]["item"].as_str().unwrap())
        .collect();
    assert_eq!(items, vec!["a", "b", "c"]);
    assert!(envelopes.iter().all(|e| e["success"] == json!(true)));
}

#[tokio::test]
async fn restriction_failure_skips_target_silently() {
    let doc = r#"
metadata:
  name: restricted
  targetActionID: r
resources:
  - actionID: r
    run:
      restrictToHTTPMethods: [POST]
      apiResponse:
        response:
          ok: true
"#;
    let engine = bare_engine();
    let request = RequestContext::new("GET", "/anything");
    let err = engine
        .execute(&workflow(doc), Some(request))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("target resource") && msg.contains("not found"), "{}", msg);
}

#[tokio::test]
async fn cyclic_dependencies_fail_at_graph_build() {
    let doc = r#"
metadata:
  name: cyclic
  targetActionID: a
resources:
  - actionID: a
    requires: [b]
    run:
      apiResponse:
        response: {}
  - actionID: b
    requires: [a]
    run:
      apiResponse:
        response: {}
"#;
    let engine = bare_engine();
    let err = engine.execute(&workflow(doc), None).await.unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("cycle") || msg.contains("failed to build dependency graph"),
        "{}",
        msg
    );
}

#[tokio::test]
async fn validation_failure_names_the_field() {
    let doc = r#"
metadata:
  name: validated
  targetActionID: r
resources:
  - actionID: r
    run:
      validation:
        required: [email]
      apiResponse:
        response:
          ok: true
"#;
    let engine = bare_engine();
    let mut request = RequestContext::new("POST", "/signup");
    request.body.insert("name".to_string(), json!("x"));

    let err = engine
        .execute(&workflow(doc), Some(request))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("VALIDATION_ERROR"), "{}", msg);
    assert!(msg.contains("email"), "{}", msg);
}

#[tokio::test]
async fn skipped_dependency_does_not_block_dependents() {
    let doc = r#"
metadata:
  name: skip-dep
  targetActionID: after
resources:
  - actionID: gated
    run:
      restrictToHTTPMethods: [POST]
      apiResponse:
        response: {}
  - actionID: after
    requires: [gated]
    run:
      apiResponse:
        response:
          done: true
"#;
    let engine = bare_engine();
    let request = RequestContext::new("GET", "/");
    let output = engine.execute(&workflow(doc), Some(request)).await.unwrap();
    assert_eq!(output, json!({"done": true}));
}

#[tokio::test]
async fn target_pruning_never_runs_unrelated_resources() {
    let doc = r#"
metadata:
  name: pruned
  targetActionID: goal
resources:
  - actionID: unrelated
    run:
      exec:
        command: irrelevant
  - actionID: goal
    run:
      apiResponse:
        response:
          ok: true
"#;
    let (executor, calls) =
        CountingExecutor::new(RunKind::Exec, Behavior::Fail("must not run".to_string()));
    let engine = engine_with(vec![executor]);

    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"ok": true}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_executor_surfaces_unavailability() {
    let doc = r#"
metadata:
  name: missing-exec
  targetActionID: r
resources:
  - actionID: r
    run:
      sql:
        connection: ":memory:"
        query: SELECT 1
"#;
    let engine = bare_engine();
    let err = engine.execute(&workflow(doc), None).await.unwrap_err();
    assert!(err.to_string().contains("sql executor not available"), "{}", err);
}

#[tokio::test]
async fn expression_only_resources_emit_the_sentinel() {
    let doc = r#"
metadata:
  name: expr-only
  targetActionID: fx
resources:
  - actionID: fx
    run:
      expr:
        - "set('seen', 'yes')"
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"status": "expressions_executed"}));
}

#[tokio::test]
async fn cancellation_aborts_before_resources_run() {
    let doc = r#"
metadata:
  name: cancelled
  targetActionID: r
resources:
  - actionID: r
    run:
      apiResponse:
        response: {}
"#;
    let engine = bare_engine();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine
        .execute_with_cancel(&workflow(doc), None, cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn executor_panics_are_trapped() {
    let doc = r#"
metadata:
  name: panicky
  targetActionID: r
resources:
  - actionID: r
    run:
      exec:
        command: irrelevant
"#;
    let (executor, _) = CountingExecutor::new(RunKind::Exec, Behavior::Panic);
    let engine = engine_with(vec![executor]);

    let err = engine.execute(&workflow(doc), None).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("engine panic"), "{}", msg);
    assert!(msg.contains("executor blew up"), "{}", msg);
}
