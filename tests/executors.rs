//! Shipped executor behavior against the real registry
//!
//! These tests use the default engine (full executor set) with
//! subprocess and in-memory SQLite actions; no network is touched.

mod common;

use common::workflow;
use flowgate::{Engine, EngineConfig, RequestContext};
use serde_json::json;

fn default_engine() -> Engine {
    Engine::new(EngineConfig::default())
}

#[tokio::test]
async fn exec_captures_stdout_and_exit_code() {
    let doc = r#"
metadata:
  name: exec-stdout
  targetActionID: hello
resources:
  - actionID: hello
    run:
      exec:
        command: printf hello
"#;
    let output = default_engine().execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output["stdout"], json!("hello"));
    assert_eq!(output["exitCode"], json!(0));
}

#[tokio::test]
async fn exec_renders_templates_into_env_and_command() {
    let doc = r#"
metadata:
  name: exec-env
  targetActionID: greet
resources:
  - actionID: greet
    run:
      exec:
        command: printf '%s' "$GREETING"
        env:
          GREETING: "hi {{get('name')}}"
"#;
    let mut request = RequestContext::new("POST", "/");
    request.body.insert("name".to_string(), json!("ada"));

    let output = default_engine()
        .execute(&workflow(doc), Some(request))
        .await
        .unwrap();
    assert_eq!(output["stdout"], json!("hi ada"));
}

#[tokio::test]
async fn exec_nonzero_exit_is_an_error_with_stderr() {
    let doc = r#"
metadata:
  name: exec-fail
  targetActionID: broken
resources:
  - actionID: broken
    run:
      exec:
        command: "echo oops >&2; exit 3"
"#;
    let err = default_engine()
        .execute(&workflow(doc), None)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("status 3"), "{}", msg);
    assert!(msg.contains("oops"), "{}", msg);
}

#[tokio::test]
async fn exec_timeout_uses_the_configured_duration() {
    let doc = r#"
metadata:
  name: exec-timeout
  targetActionID: slow
resources:
  - actionID: slow
    run:
      exec:
        command: sleep 5
        timeoutDuration: 1s
"#;
    let err = default_engine()
        .execute(&workflow(doc), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"), "{}", err);
}

#[tokio::test]
async fn sql_rows_flow_into_expressions() {
    let doc = r#"
metadata:
  name: sql-read
  targetActionID: respond
resources:
  - actionID: lookup
    run:
      sql:
        connection: ":memory:"
        query: "SELECT 41 + 1 AS answer, 'ada' AS name"
  - actionID: respond
    requires: [lookup]
    run:
      apiResponse:
        response:
          answer: "{{output('lookup').rows[0].answer}}"
          rowCount: "{{output('lookup').rowCount}}"
"#;
    let output = default_engine().execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"answer": 42, "rowCount": 1}));
}

#[tokio::test]
async fn sql_bind_parameters_are_evaluated() {
    let doc = r#"
metadata:
  name: sql-params
  targetActionID: lookup
resources:
  - actionID: lookup
    run:
      sql:
        connection: ":memory:"
        query: "SELECT ? AS echoed"
        params:
          - "{{get('word')}}"
"#;
    let mut request = RequestContext::new("POST", "/");
    request.body.insert("word".to_string(), json!("lovelace"));

    let output = default_engine()
        .execute(&workflow(doc), Some(request))
        .await
        .unwrap();
    assert_eq!(output["rows"][0]["echoed"], json!("lovelace"));
}

#[tokio::test]
async fn tts_without_a_command_is_a_clear_error() {
    let doc = r#"
metadata:
  name: tts-missing
  targetActionID: speak
resources:
  - actionID: speak
    run:
      tts:
        text: hello
"#;
    let err = default_engine()
        .execute(&workflow(doc), None)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("no tts synthesis command configured"),
        "{}",
        err
    );
}
