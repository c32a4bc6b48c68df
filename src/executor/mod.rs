//! Action executors
//!
//! Every resource kind is served by a plugin implementing a single
//! `execute(call, run) -> value` contract. The registry dispatches by
//! kind tag; executors that opt into extra engine callbacks expose a
//! capability interface the engine checks per dispatch.

pub mod chat;
pub mod exec;
pub mod http;
pub mod python;
pub mod sql;
pub mod tts;

pub use chat::ChatExecutor;
pub use exec::ExecExecutor;
pub use http::HttpExecutor;
pub use python::PythonExecutor;
pub use sql::SqlExecutor;
pub use tts::TtsExecutor;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{parse_timeout, EngineConfig};
use crate::context::SharedContext;
use crate::error::{ActionError, EngineError, EngineResult};
use crate::eval::{resolve_template, value_to_string, walk_value, Env, Evaluator};
use crate::workflow::{RunKind, RunSpec};

/// Everything an executor needs for one dispatch
#[derive(Clone)]
pub struct ExecCall {
    /// Shared execution context
    pub ctx: SharedContext,
    /// Expression evaluator
    pub evaluator: Arc<dyn Evaluator>,
    /// Environment snapshot for this dispatch
    pub env: Env,
    /// Cancellation handle for in-flight work
    pub cancel: CancelToken,
    /// Fallback timeout when the config does not set one
    pub default_timeout: Duration,
}

impl ExecCall {
    /// Resolve template placeholders in a config string
    pub fn render(&self, raw: &str) -> EngineResult<String> {
        let value = resolve_template(self.evaluator.as_ref(), raw, &self.env)?;
        Ok(value_to_string(&value))
    }

    /// Resolve template placeholders in a config string, keeping the
    /// evaluated type when the string is a sole placeholder
    pub fn render_raw(&self, raw: &str) -> EngineResult<Value> {
        Ok(resolve_template(self.evaluator.as_ref(), raw, &self.env)?)
    }

    /// Recursively materialize a config value
    pub fn render_value(&self, value: &Value) -> EngineResult<Value> {
        Ok(walk_value(self.evaluator.as_ref(), value, &self.env)?)
    }

    /// Resolve template placeholders in a string map
    pub fn render_map(&self, map: &HashMap<String, String>) -> EngineResult<HashMap<String, String>> {
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
            .collect()
    }

    /// Effective timeout for this dispatch
    pub fn timeout(&self, configured: Option<&str>) -> Duration {
        parse_timeout(configured, self.default_timeout)
    }
}

/// Engine callback for running a workflow-defined tool on behalf of a
/// chat model
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the named tool with model-supplied arguments
    async fn run_tool(&self, name: &str, args: &Value) -> EngineResult<Value>;
}

/// Capability interface for executors that accept engine callbacks
pub trait ChatCapabilities: Send + Sync {
    /// Install the engine's tool-invocation callback
    fn set_tool_executor(&self, tools: Arc<dyn ToolExecutor>);
    /// Toggle offline mode
    fn set_offline(&self, offline: bool);
}

/// A pluggable action executor
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Kind tag this executor serves
    fn kind(&self) -> RunKind;

    /// Run the action described by the resource's run block
    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value>;

    /// Optional capability hooks; executors opt in explicitly
    fn chat_capabilities(&self) -> Option<&dyn ChatCapabilities> {
        None
    }
}

/// Lookup-by-kind dispatch table
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<RunKind, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every shipped executor installed
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ChatExecutor::new(
            config.llm_base_url.clone(),
            config.llm_backend.clone(),
            config.offline,
        )));
        registry.register(Arc::new(HttpExecutor::new()));
        registry.register(Arc::new(SqlExecutor::new()));
        registry.register(Arc::new(PythonExecutor::new(config.python_bin.clone())));
        registry.register(Arc::new(ExecExecutor::new()));
        registry.register(Arc::new(TtsExecutor::new(config.tts_command.clone())));
        registry
    }

    /// Install (or replace) the executor for its kind
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    /// Executor for a kind, or a clear unavailability error
    pub fn get(&self, kind: RunKind) -> EngineResult<Arc<dyn ActionExecutor>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::ExecutorUnavailable(kind.to_string()))
    }
}

/// Run a child process with timeout and cancellation, capturing output
pub(crate) async fn run_command(
    mut command: tokio::process::Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> EngineResult<Output> {
    command.kill_on_drop(true);
    let child = command
        .output();
    tokio::select! {
        result = tokio::time::timeout(timeout, child) => match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ActionError::new(format!("failed to spawn process: {}", e))
                .with_type("process")
                .into()),
            Err(_) => Err(ActionError::new(format!(
                "process timed out after {}s",
                timeout.as_secs()
            ))
            .with_type("process")
            .with_code("TIMEOUT")
            .into()),
        },
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

/// Shape subprocess output the way expression accessors expect it
pub(crate) fn process_output_value(output: &Output) -> Value {
    serde_json::json!({
        "stdout": String::from_utf8_lossy(&output.stdout).trim_end(),
        "stderr": String::from_utf8_lossy(&output.stderr).trim_end(),
        "exitCode": output.status.code().unwrap_or(-1),
    })
}
