//! Workflow execution engine
//!
//! Drives one request through a workflow: build the execution context,
//! sort the dependency graph pruned to the target, then run each
//! resource through its gates (restrictions, skip conditions,
//! validation, preflight), fan out over items when declared, dispatch
//! to the registered executor under the error-handling policy, and
//! finally resolve and unwrap the target output.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::context::env::build_env;
use crate::context::{
    ExecutionContext, ItemScope, KvStore, LlmMetadata, RequestContext, SessionRegistry,
    SharedContext,
};
use crate::error::{ActionError, EngineError, EngineResult, PreflightError};
use crate::eval::{
    resolve_template, truthy, value_to_string, walk_value, EnvValue, Evaluator, SimpleEvaluator,
};
use crate::executor::{run_command, ExecCall, ExecutorRegistry, ToolExecutor};
use crate::graph::DependencyGraph;
use crate::response;
use crate::restrict::matches_restrictions;
use crate::validation::validate_request;
use crate::workflow::{OnErrorAction, Resource, RunKind, ToolSpec, Workflow};

/// Declarative workflow execution engine
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    evaluator: Arc<dyn Evaluator>,
    sessions: Arc<SessionRegistry>,
    memory: Arc<KvStore>,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Create an engine with the default executor set and expression
    /// dialect
    pub fn new(config: EngineConfig) -> Self {
        let registry = ExecutorRegistry::with_defaults(&config);
        Self {
            registry: Arc::new(registry),
            evaluator: Arc::new(SimpleEvaluator::new()),
            sessions: Arc::new(SessionRegistry::new()),
            memory: Arc::new(KvStore::new()),
            config: Arc::new(config),
        }
    }

    /// Replace the executor registry
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replace the expression evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Process-wide memory store
    pub fn memory_store(&self) -> Arc<KvStore> {
        self.memory.clone()
    }

    /// Session registry shared across requests
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    /// Execute a workflow for a request, without external cancellation
    pub async fn execute(
        &self,
        workflow: &Workflow,
        request: Option<RequestContext>,
    ) -> EngineResult<Value> {
        self.execute_with_cancel(workflow, request, CancelToken::new())
            .await
    }

    /// Execute a workflow for a request under a cancellation signal
    pub async fn execute_with_cancel(
        &self,
        workflow: &Workflow,
        request: Option<RequestContext>,
        cancel: CancelToken,
    ) -> EngineResult<Value> {
        let graph = DependencyGraph::build(workflow)?;
        let order: Vec<String> = graph
            .execution_order(&workflow.metadata.target_action_id)?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        debug!(
            workflow = %workflow.metadata.name,
            target = %workflow.metadata.target_action_id,
            resources = order.len(),
            "execution order resolved"
        );

        let mut request = request;
        let session = match request.as_mut().and_then(|r| r.infer_session_id()) {
            Some(id) => self.sessions.session(&id),
            None => Arc::new(KvStore::new()),
        };

        let mut ctx = ExecutionContext::new(request, session, self.memory.clone());
        ctx.set_allow_lists(
            workflow.settings.allowed_params.clone(),
            workflow.settings.allowed_headers.clone(),
        );
        let fs_root = workflow
            .settings
            .fs_root
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.fs_root.clone());
        ctx.set_fs_root(fs_root);
        let shared: SharedContext = Arc::new(RwLock::new(ctx));

        let mut skipped: HashSet<String> = HashSet::new();

        for action_id in &order {
            cancel.check()?;
            let resource = workflow.resource(action_id).ok_or_else(|| {
                EngineError::Graph(format!("resource '{}' vanished from workflow", action_id))
            })?;
            resource.run.validate_variant(action_id)?;

            let admitted = {
                let guard = shared.read();
                matches_restrictions(&resource.run, guard.request.as_ref())
            };
            if !admitted {
                debug!(resource = %action_id, "restrictions not met, skipping");
                skipped.insert(action_id.clone());
                continue;
            }

            if self.should_skip(&shared, resource)? {
                debug!(resource = %action_id, "skip condition met");
                skipped.insert(action_id.clone());
                continue;
            }

            if let Some(validation) = &resource.run.validation {
                let data = shared.read().request_data()?;
                let env = build_env(&shared);
                validate_request(validation, &data, self.evaluator.as_ref(), &env)?;
            }

            self.check_preflight(&shared, resource)?;

            let output = self.run_resource(workflow, &shared, resource, &cancel).await?;
            match output {
                Value::Null => {
                    debug!(resource = %action_id, "resource produced no output");
                }
                value => {
                    shared.write().set_output(action_id.clone(), value);
                    info!(resource = %action_id, "resource completed");
                }
            }
        }

        let target = &workflow.metadata.target_action_id;
        let result = match shared.read().output(target) {
            Some(value) => Ok(response::unwrap_envelope(value)),
            None if skipped.contains(target) => Err(EngineError::TargetNotFound(target.clone())),
            None => Err(EngineError::NoOutput(target.clone())),
        };
        result
    }

    fn should_skip(&self, shared: &SharedContext, resource: &Resource) -> EngineResult<bool> {
        if resource.run.skip_condition.is_empty() {
            return Ok(false);
        }
        let env = build_env(shared);
        for condition in &resource.run.skip_condition {
            let value = self.evaluator.evaluate(&condition.raw, &env).map_err(|e| {
                EngineError::Evaluation(format!(
                    "skip condition '{}' on resource '{}': {}",
                    condition.raw, resource.action_id, e
                ))
            })?;
            if truthy(&value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_preflight(&self, shared: &SharedContext, resource: &Resource) -> EngineResult<()> {
        let Some(preflight) = &resource.run.preflight_check else {
            return Ok(());
        };
        let env = build_env(shared);
        for validation in &preflight.validations {
            let value = self.evaluator.evaluate(&validation.raw, &env).map_err(|e| {
                EngineError::Evaluation(format!(
                    "preflight expression '{}' on resource '{}': {}",
                    validation.raw, resource.action_id, e
                ))
            })?;
            if !truthy(&value) {
                let err = match &preflight.error {
                    Some(spec) => PreflightError {
                        code: spec.code,
                        message: spec.message.clone(),
                    },
                    None => PreflightError::generic(&validation.raw),
                };
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Fan out over items when declared and not already iterating;
    /// otherwise dispatch directly
    async fn run_resource(
        &self,
        workflow: &Workflow,
        shared: &SharedContext,
        resource: &Resource,
        cancel: &CancelToken,
    ) -> EngineResult<Value> {
        let already_iterating = shared.read().in_iteration();
        if resource.items.is_empty() || already_iterating {
            return self
                .dispatch_with_policy(workflow, shared, resource, cancel)
                .await;
        }

        let Some(items) = self.resolve_items(shared, resource)? else {
            warn!(
                resource = %resource.action_id,
                "items did not resolve to a sequence, running without iteration"
            );
            return self
                .dispatch_with_policy(workflow, shared, resource, cancel)
                .await;
        };

        let count = items.len();
        let mut results = Vec::with_capacity(count);
        for (index, current) in items.iter().enumerate() {
            cancel.check()?;
            let scope = ItemScope {
                current: current.clone(),
                index,
                count,
                prev: if index > 0 {
                    items[index - 1].clone()
                } else {
                    Value::Null
                },
                next: items.get(index + 1).cloned().unwrap_or(Value::Null),
                items: items.clone(),
                var_name: resource.item_var.clone(),
            };
            shared.write().enter_item_scope(scope);
            let result = self
                .dispatch_with_policy(workflow, shared, resource, cancel)
                .await;
            shared.write().exit_item_scope();
            let value = result?;
            shared
                .write()
                .push_item_value(resource.action_id.clone(), value.clone());
            results.push(value);
        }

        Ok(Value::Array(results))
    }

    /// Resolve the items declaration to a sequence. A single entry may
    /// evaluate to a sequence directly or name a context key / resource
    /// output holding one; multiple entries form the sequence
    /// themselves. Entries that evaluate to nothing fall back to their
    /// literal text.
    fn resolve_items(
        &self,
        shared: &SharedContext,
        resource: &Resource,
    ) -> EngineResult<Option<Vec<Value>>> {
        let env = build_env(shared);
        let mut values = Vec::with_capacity(resource.items.len());
        for expr in &resource.items {
            let value = match self.evaluator.evaluate(&expr.raw, &env) {
                Ok(Value::Null) if !expr.is_template() => Value::String(expr.raw.clone()),
                Ok(value) => value,
                Err(_) if !expr.is_template() => Value::String(expr.raw.clone()),
                Err(e) => {
                    return Err(EngineError::Evaluation(format!(
                        "items expression '{}' on resource '{}': {}",
                        expr.raw, resource.action_id, e
                    )))
                }
            };
            values.push(value);
        }

        if values.len() != 1 {
            return Ok(Some(values));
        }

        match values.into_iter().next() {
            Some(Value::Array(sequence)) => Ok(Some(sequence)),
            Some(Value::String(name)) => {
                let resolved = shared.read().get(&name, None).ok();
                match resolved {
                    Some(Value::Array(sequence)) => Ok(Some(sequence)),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// One dispatch under the resource's error-handling policy
    async fn dispatch_with_policy(
        &self,
        workflow: &Workflow,
        shared: &SharedContext,
        resource: &Resource,
        cancel: &CancelToken,
    ) -> EngineResult<Value> {
        let action_id = resource.action_id.as_str();
        let first = self.dispatch_once(workflow, shared, resource, cancel).await;
        let err = match first {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if matches!(err, EngineError::Cancelled | EngineError::Panic(_)) {
            return Err(err);
        }

        let Some(policy) = resource.run.on_error.as_ref() else {
            return Err(wrap_resource_error(action_id, err));
        };

        let error_value = response::error_binding(&err);

        let applies = if policy.when.is_empty() {
            true
        } else {
            let mut env = build_env(shared);
            env.insert("error".to_string(), EnvValue::Value(error_value.clone()));
            policy.when.iter().any(|condition| {
                match self.evaluator.evaluate(&condition.raw, &env) {
                    Ok(value) => truthy(&value),
                    Err(e) => {
                        warn!(
                            resource = %action_id,
                            condition = %condition.raw,
                            error = %e,
                            "onError when-condition failed to evaluate, skipping"
                        );
                        false
                    }
                }
            })
        };
        if !applies {
            return Err(wrap_resource_error(action_id, err));
        }

        if !policy.expr.is_empty() {
            let mut env = build_env(shared);
            env.insert("error".to_string(), EnvValue::Value(error_value.clone()));
            for expr in &policy.expr {
                if let Err(e) = self.evaluator.evaluate(&expr.raw, &env) {
                    warn!(
                        resource = %action_id,
                        expr = %expr.raw,
                        error = %e,
                        "onError expression failed"
                    );
                }
            }
        }

        match policy.action {
            OnErrorAction::Fail => Err(wrap_resource_error(action_id, err)),
            OnErrorAction::Retry => {
                let mut last = err;
                for attempt in 1..=policy.max_retries {
                    cancel.check()?;
                    debug!(resource = %action_id, attempt, "retrying resource");
                    match self.dispatch_once(workflow, shared, resource, cancel).await {
                        Ok(value) => return Ok(value),
                        Err(e) if matches!(e, EngineError::Cancelled | EngineError::Panic(_)) => {
                            return Err(e)
                        }
                        Err(e) => last = e,
                    }
                }
                Err(EngineError::Executor {
                    action_id: action_id.to_string(),
                    message: format!(
                        "all {} retry attempts failed: {}",
                        policy.max_retries, last
                    ),
                })
            }
            OnErrorAction::Continue => match &policy.fallback {
                Some(fallback) => {
                    let mut env = build_env(shared);
                    env.insert("error".to_string(), EnvValue::Value(error_value));
                    match walk_value(self.evaluator.as_ref(), fallback, &env) {
                        Ok(value) => {
                            debug!(resource = %action_id, "continuing with fallback output");
                            Ok(value)
                        }
                        Err(e) => {
                            warn!(
                                resource = %action_id,
                                error = %e,
                                "fallback evaluation failed, surfacing original error"
                            );
                            Err(wrap_resource_error(action_id, err))
                        }
                    }
                }
                None => Ok(response::handled_error_output(&err.to_string())),
            },
        }
    }

    /// A single dispatch: expression side effects, then the action
    /// variant, with executor panics trapped
    async fn dispatch_once(
        &self,
        workflow: &Workflow,
        shared: &SharedContext,
        resource: &Resource,
        cancel: &CancelToken,
    ) -> EngineResult<Value> {
        let env = build_env(shared);

        for expr in &resource.run.expr {
            self.evaluator.evaluate(&expr.raw, &env).map_err(|e| {
                EngineError::Evaluation(format!(
                    "expression '{}' on resource '{}': {}",
                    expr.raw, resource.action_id, e
                ))
            })?;
        }

        let Some(kind) = resource.run.kind() else {
            if resource.run.expr.is_empty() {
                return Err(EngineError::InvalidContext(format!(
                    "resource '{}' declares neither an action variant nor expressions",
                    resource.action_id
                )));
            }
            return Ok(serde_json::json!({"status": "expressions_executed"}));
        };

        if kind == RunKind::ApiResponse {
            return self.materialize_api_response(shared, resource);
        }

        let call = ExecCall {
            ctx: shared.clone(),
            evaluator: self.evaluator.clone(),
            env,
            cancel: cancel.child(),
            default_timeout: self.config.default_timeout(),
        };
        if kind == RunKind::Chat {
            self.prepare_chat(workflow, shared, resource, &call)?;
        }

        let executor = self.registry.get(kind)?;
        let dispatch = executor.execute(&call, &resource.run);
        match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(EngineError::Panic(panic_message(payload))),
        }
    }

    /// Walk the response template and wrap it in the envelope
    fn materialize_api_response(
        &self,
        shared: &SharedContext,
        resource: &Resource,
    ) -> EngineResult<Value> {
        let config = resource.run.api_response.as_ref().ok_or_else(|| {
            EngineError::InvalidContext("apiResponse config missing".to_string())
        })?;
        let env = build_env(shared);
        let data = walk_value(self.evaluator.as_ref(), &config.response, &env)?;

        let mut meta = serde_json::Map::new();
        if let Some(meta_config) = &config.meta {
            if !meta_config.headers.is_empty() {
                let mut headers = serde_json::Map::new();
                for (name, value) in &meta_config.headers {
                    let rendered = resolve_template(self.evaluator.as_ref(), value, &env)?;
                    headers.insert(name.clone(), Value::String(value_to_string(&rendered)));
                }
                meta.insert("headers".to_string(), Value::Object(headers));
            }
        }
        if let Some(llm) = shared.read().llm_metadata.clone() {
            meta.insert("model".to_string(), Value::String(llm.model));
            meta.insert("backend".to_string(), Value::String(llm.backend));
        }

        let meta = if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        };
        Ok(response::make_envelope(config.success, data, meta))
    }

    /// Pre-dispatch work for chat resources: resolve the model,
    /// record metadata and install capability callbacks
    fn prepare_chat(
        &self,
        workflow: &Workflow,
        shared: &SharedContext,
        resource: &Resource,
        call: &ExecCall,
    ) -> EngineResult<()> {
        let Some(chat) = resource.run.chat.as_ref() else {
            return Ok(());
        };

        let model = call.render(&chat.model)?;
        shared.write().llm_metadata = Some(LlmMetadata {
            model,
            backend: self.config.llm_backend.clone(),
        });

        let executor = self.registry.get(RunKind::Chat)?;
        if let Some(capabilities) = executor.chat_capabilities() {
            capabilities.set_offline(self.config.offline || workflow.settings.offline);
            if !chat.tools.is_empty() {
                capabilities.set_tool_executor(Arc::new(WorkflowTools {
                    tools: chat.tools.clone(),
                    call: call.clone(),
                }));
            }
        }
        Ok(())
    }
}

/// Tool-invocation callback handed to chat executors: resolves the
/// named workflow tool and runs its script with the model's arguments
/// bound as `args`
struct WorkflowTools {
    tools: Vec<ToolSpec>,
    call: ExecCall,
}

#[async_trait]
impl ToolExecutor for WorkflowTools {
    async fn run_tool(&self, name: &str, args: &Value) -> EngineResult<Value> {
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            return Err(ActionError::new(format!("unknown tool '{}'", name))
                .with_type("tool")
                .into());
        };
        let Some(script) = tool.script.as_ref() else {
            return Err(ActionError::new(format!("tool '{}' has no script", name))
                .with_type("tool")
                .into());
        };

        let mut env = self.call.env.clone();
        env.insert("args".to_string(), EnvValue::Value(args.clone()));
        let rendered = resolve_template(self.call.evaluator.as_ref(), &script.raw, &env)?;

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(value_to_string(&rendered));
        let output = run_command(command, self.call.default_timeout, &self.call.cancel).await?;
        Ok(Value::String(
            String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        ))
    }
}

/// Wrap an error so the final message identifies the resource, leaving
/// the structured kinds (cancellation, panic, preflight, validation)
/// untouched
fn wrap_resource_error(action_id: &str, err: EngineError) -> EngineError {
    match err {
        e @ (EngineError::Cancelled
        | EngineError::Panic(_)
        | EngineError::Preflight(_)
        | EngineError::Validation(_)) => e,
        e => EngineError::Executor {
            action_id: action_id.to_string(),
            message: e.to_string(),
        },
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
