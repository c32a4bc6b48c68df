//! LLM chat executor
//!
//! Talks to an OpenAI-compatible/Ollama-style chat endpoint. Tool
//! invocation and offline mode are engine callbacks installed through
//! the capability interface before dispatch.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{ChatConfig, RunKind, RunSpec};

use super::{ActionExecutor, ChatCapabilities, ExecCall, ToolExecutor};

/// Upper bound on model→tool→model round trips per dispatch
const MAX_TOOL_ROUNDS: usize = 4;

/// Executor for `chat` resources
pub struct ChatExecutor {
    client: reqwest::Client,
    base_url: String,
    backend: String,
    offline: AtomicBool,
    tool_executor: RwLock<Option<Arc<dyn ToolExecutor>>>,
}

impl ChatExecutor {
    /// Create an executor against a chat completion endpoint
    pub fn new(base_url: String, backend: String, offline: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            backend,
            offline: AtomicBool::new(offline),
            tool_executor: RwLock::new(None),
        }
    }

    fn build_messages(&self, call: &ExecCall, config: &ChatConfig) -> EngineResult<Vec<Value>> {
        let mut messages = Vec::new();
        for message in &config.scenario {
            messages.push(serde_json::json!({
                "role": message.role,
                "content": call.render(&message.prompt)?,
            }));
        }
        if let Some(prompt) = &config.prompt {
            messages.push(serde_json::json!({
                "role": config.role.as_deref().unwrap_or("user"),
                "content": call.render(prompt)?,
            }));
        }
        if messages.is_empty() {
            return Err(EngineError::InvalidContext(
                "chat config declares neither prompt nor scenario".to_string(),
            ));
        }
        Ok(messages)
    }

    fn tool_definitions(&self, config: &ChatConfig) -> Vec<Value> {
        config
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description.clone().unwrap_or_default(),
                        "parameters": tool.parameters.clone().unwrap_or_else(|| {
                            serde_json::json!({"type": "object", "properties": {}})
                        }),
                    }
                })
            })
            .collect()
    }

    async fn round_trip(
        &self,
        call: &ExecCall,
        payload: &Value,
        timeout: std::time::Duration,
    ) -> EngineResult<Value> {
        let url = format!("{}/api/chat", self.base_url);
        let response = tokio::select! {
            result = self.client.post(&url).json(payload).timeout(timeout).send() => {
                result.map_err(|e| {
                    let mut err = ActionError::new(format!("chat request failed: {}", e))
                        .with_type("llm");
                    if e.is_timeout() {
                        err = err.with_code("TIMEOUT");
                    }
                    EngineError::from(err)
                })?
            }
            _ = call.cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            EngineError::from(
                ActionError::new(format!("chat response decode failed: {}", e)).with_type("llm"),
            )
        })?;
        if !status.is_success() {
            return Err(ActionError::new(format!(
                "chat backend returned {}: {}",
                status,
                body.get("error").map(|e| e.to_string()).unwrap_or_default()
            ))
            .with_type("llm")
            .with_status(i64::from(status.as_u16()))
            .into());
        }
        Ok(body)
    }
}

#[async_trait]
impl ActionExecutor for ChatExecutor {
    fn kind(&self) -> RunKind {
        RunKind::Chat
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run
            .chat
            .as_ref()
            .ok_or_else(|| EngineError::InvalidContext("chat config missing".to_string()))?;

        if self.offline.load(Ordering::Acquire) {
            return Err(ActionError::new("chat executor is in offline mode")
                .with_type("llm")
                .with_code("OFFLINE")
                .into());
        }

        let model = call.render(&config.model)?;
        let mut messages = self.build_messages(call, config)?;
        let prompt = messages
            .last()
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timeout = call.timeout(config.timeout_duration.as_deref());

        let tools = self.tool_definitions(config);
        let tool_executor = self.tool_executor.read().clone();

        let mut content = String::new();
        for _round in 0..MAX_TOOL_ROUNDS {
            let mut payload = serde_json::json!({
                "model": model,
                "messages": messages,
                "stream": false,
            });
            if config.json_response {
                payload["format"] = Value::String("json".to_string());
            }
            if !tools.is_empty() && tool_executor.is_some() {
                payload["tools"] = Value::Array(tools.clone());
            }

            let body = self.round_trip(call, &payload, timeout).await?;
            let message = body.get("message").cloned().unwrap_or(Value::Null);
            content = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let tool_calls = message
                .get("tool_calls")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let Some(runner) = tool_executor.as_ref().filter(|_| !tool_calls.is_empty()) else {
                break;
            };

            messages.push(message.clone());
            for tool_call in &tool_calls {
                let name = tool_call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let args = tool_call
                    .pointer("/function/arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                let result = runner.run_tool(name, &args).await?;
                messages.push(serde_json::json!({
                    "role": "tool",
                    "content": crate::eval::value_to_string(&result),
                }));
            }
        }

        let response = if config.json_response {
            serde_json::from_str::<Value>(&content).unwrap_or(Value::String(content))
        } else {
            Value::String(content)
        };

        Ok(serde_json::json!({
            "response": response,
            "prompt": prompt,
            "model": model,
            "backend": self.backend,
        }))
    }

    fn chat_capabilities(&self) -> Option<&dyn ChatCapabilities> {
        Some(self)
    }
}

impl ChatCapabilities for ChatExecutor {
    fn set_tool_executor(&self, tools: Arc<dyn ToolExecutor>) {
        *self.tool_executor.write() = Some(tools);
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }
}
