//! Shared test fixtures: counting mock executors and engine builders

use async_trait::async_trait;
use flowgate::{
    ActionError, ActionExecutor, Engine, EngineConfig, EngineResult, ExecCall, ExecutorRegistry,
    RunKind, RunSpec, Workflow,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a mock executor does on each call
#[allow(dead_code)]
pub enum Behavior {
    /// Always succeed with this value
    Succeed(Value),
    /// Always fail with this message
    Fail(String),
    /// Fail the first `failures` calls, then succeed with the value
    FailThenSucceed { failures: usize, value: Value },
    /// Panic on every call
    Panic,
}

/// Mock executor that counts invocations
pub struct CountingExecutor {
    pub kind: RunKind,
    pub calls: Arc<AtomicUsize>,
    pub behavior: Behavior,
}

#[allow(dead_code)]
impl CountingExecutor {
    pub fn new(kind: RunKind, behavior: Behavior) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(Self {
            kind,
            calls: calls.clone(),
            behavior,
        });
        (executor, calls)
    }
}

#[async_trait]
impl ActionExecutor for CountingExecutor {
    fn kind(&self) -> RunKind {
        self.kind
    }

    async fn execute(&self, _call: &ExecCall, _run: &RunSpec) -> EngineResult<Value> {
        let seen = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(value) => Ok(value.clone()),
            Behavior::Fail(message) => Err(ActionError::new(message.clone()).into()),
            Behavior::FailThenSucceed { failures, value } => {
                if seen < *failures {
                    Err(ActionError::new("transient failure").into())
                } else {
                    Ok(value.clone())
                }
            }
            Behavior::Panic => panic!("executor blew up"),
        }
    }
}

/// Engine with only the given executors registered
#[allow(dead_code)]
pub fn engine_with(executors: Vec<Arc<dyn ActionExecutor>>) -> Engine {
    let mut registry = ExecutorRegistry::new();
    for executor in executors {
        registry.register(executor);
    }
    Engine::new(EngineConfig::default()).with_registry(registry)
}

/// Engine with an empty registry (apiResponse and expr blocks only)
#[allow(dead_code)]
pub fn bare_engine() -> Engine {
    engine_with(Vec::new())
}

/// Parse a YAML workflow document, failing the test on errors
#[allow(dead_code)]
pub fn workflow(doc: &str) -> Workflow {
    Workflow::from_yaml(doc).expect("workflow document must parse")
}
