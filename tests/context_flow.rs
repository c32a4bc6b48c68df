//! Context, store and iteration behavior across full executions

mod common;

use common::{bare_engine, engine_with, workflow, Behavior, CountingExecutor};
use flowgate::{RequestContext, RunKind};
use serde_json::json;

fn request_with_session(session: &str) -> RequestContext {
    let mut request = RequestContext::new("POST", "/flow");
    request
        .headers
        .insert("X-Session-ID".to_string(), session.to_string());
    request
}

#[tokio::test]
async fn session_values_round_trip_within_a_request() {
    let doc = r#"
metadata:
  name: session-round-trip
  targetActionID: read
resources:
  - actionID: write
    run:
      expr:
        - "set('color', 'teal', 'session')"
  - actionID: read
    requires: [write]
    run:
      apiResponse:
        response:
          color: "{{get('color', 'session')}}"
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"color": "teal"}));
}

#[tokio::test]
async fn sessions_persist_per_session_id_across_requests() {
    let write_doc = r#"
metadata:
  name: session-write
  targetActionID: write
resources:
  - actionID: write
    run:
      expr:
        - "set('seen', 'yes', 'session')"
"#;
    let read_doc = r#"
metadata:
  name: session-read
  targetActionID: read
resources:
  - actionID: read
    run:
      apiResponse:
        response:
          seen: "{{get('seen', 'session')}}"
"#;
    let engine = bare_engine();
    engine
        .execute(&workflow(write_doc), Some(request_with_session("alpha")))
        .await
        .unwrap();

    let same_session = engine
        .execute(&workflow(read_doc), Some(request_with_session("alpha")))
        .await
        .unwrap();
    assert_eq!(same_session, json!({"seen": "yes"}));

    let other_session = engine
        .execute(&workflow(read_doc), Some(request_with_session("beta")))
        .await
        .unwrap();
    assert_eq!(other_session, json!({"seen": null}));
}

#[tokio::test]
async fn memory_is_process_wide_across_requests() {
    let write_doc = r#"
metadata:
  name: memory-write
  targetActionID: write
resources:
  - actionID: write
    run:
      expr:
        - "set('boot_count', 7)"
"#;
    let read_doc = r#"
metadata:
  name: memory-read
  targetActionID: read
resources:
  - actionID: read
    run:
      apiResponse:
        response:
          boots: "{{get('boot_count', 'memory')}}"
"#;
    let engine = bare_engine();
    engine.execute(&workflow(write_doc), None).await.unwrap();
    let output = engine.execute(&workflow(read_doc), None).await.unwrap();
    assert_eq!(output, json!({"boots": 7}));
}

#[tokio::test]
async fn skip_condition_skips_the_resource() {
    let doc = r#"
metadata:
  name: skipped
  targetActionID: maybe
resources:
  - actionID: maybe
    run:
      skipCondition:
        - "request.method == 'GET'"
      apiResponse:
        response: {}
"#;
    let engine = bare_engine();
    let err = engine
        .execute(&workflow(doc), Some(RequestContext::new("GET", "/")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "{}", err);

    let output = engine
        .execute(&workflow(doc), Some(RequestContext::new("POST", "/")))
        .await
        .unwrap();
    assert_eq!(output, json!({}));
}

#[tokio::test]
async fn item_variable_and_companions_are_bound() {
    let doc = r#"
metadata:
  name: item-vars
  targetActionID: each
resources:
  - actionID: each
    items: [apple, pear]
    itemVar: fruit
    run:
      apiResponse:
        response:
          fruit: "{{fruit}}"
          index: "{{info('index')}}"
          count: "{{info('count')}}"
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    let results = output.as_array().unwrap();
    assert_eq!(results[0]["data"], json!({"fruit": "apple", "index": 0, "count": 2}));
    assert_eq!(results[1]["data"], json!({"fruit": "pear", "index": 1, "count": 2}));
}

#[tokio::test]
async fn item_values_are_visible_downstream() {
    let doc = r#"
metadata:
  name: item-values
  targetActionID: summary
resources:
  - actionID: each
    items: [x, y]
    run:
      apiResponse:
        response:
          item: "{{get('item')}}"
  - actionID: summary
    requires: [each]
    run:
      apiResponse:
        response:
          first: "{{item.values('each')[0].data.item}}"
          collected: "{{item.values('each')}}"
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output["first"], json!("x"));
    assert_eq!(output["collected"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn single_item_entry_resolves_a_body_sequence() {
    let doc = r#"
metadata:
  name: item-ref
  targetActionID: each
resources:
  - actionID: each
    items: ["{{get('names')}}"]
    run:
      apiResponse:
        response:
          name: "{{get('item')}}"
"#;
    let engine = bare_engine();
    let mut request = RequestContext::new("POST", "/");
    request
        .body
        .insert("names".to_string(), json!(["ada", "grace"]));

    let output = engine.execute(&workflow(doc), Some(request)).await.unwrap();
    let results = output.as_array().unwrap();
    assert_eq!(results[0]["data"]["name"], json!("ada"));
    assert_eq!(results[1]["data"]["name"], json!("grace"));
}

#[tokio::test]
async fn non_sequence_items_fall_back_to_plain_dispatch() {
    let doc = r#"
metadata:
  name: item-nil
  targetActionID: each
resources:
  - actionID: each
    items: ["{{get('missing_key')}}"]
    run:
      apiResponse:
        response:
          ran: once
"#;
    let engine = bare_engine();
    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output, json!({"ran": "once"}));
}

#[tokio::test]
async fn chat_output_is_readable_through_llm_accessors() {
    let doc = r#"
metadata:
  name: chat-meta
  targetActionID: respond
resources:
  - actionID: ask
    run:
      chat:
        model: "{{get('m')}}"
        prompt: say hi
  - actionID: respond
    requires: [ask]
    run:
      apiResponse:
        response:
          answer: "{{llm.response('ask')}}"
"#;
    let (executor, _) = CountingExecutor::new(
        RunKind::Chat,
        Behavior::Succeed(json!({"response": "hello there", "model": "tiny"})),
    );
    let engine = engine_with(vec![executor]);
    let mut request = RequestContext::new("POST", "/chat");
    request.body.insert("m".to_string(), json!("tiny-model"));

    let output = engine.execute(&workflow(doc), Some(request)).await.unwrap();
    assert_eq!(output["answer"], json!("hello there"));
}

#[tokio::test]
async fn non_target_envelopes_keep_success_and_meta() {
    let doc = r#"
metadata:
  name: envelope-kept
  targetActionID: second
resources:
  - actionID: ask
    run:
      chat:
        model: tiny
        prompt: hi
  - actionID: first
    requires: [ask]
    run:
      apiResponse:
        success: true
        response:
          ok: true
  - actionID: second
    requires: [first]
    run:
      apiResponse:
        response:
          upstream_success: "{{output('first').success}}"
          upstream_model: "{{output('first')._meta.model}}"
"#;
    let (executor, _) = CountingExecutor::new(
        RunKind::Chat,
        Behavior::Succeed(json!({"response": "x"})),
    );
    let engine = engine_with(vec![executor]);

    let output = engine.execute(&workflow(doc), None).await.unwrap();
    assert_eq!(output["upstream_success"], json!(true));
    assert_eq!(output["upstream_model"], json!("tiny"));
}
