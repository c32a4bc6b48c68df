//! HTTP client executor

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{RunKind, RunSpec};

use super::{ActionExecutor, ExecCall};

/// Executor for `httpClient` resources
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Create an executor with a shared connection pool
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    fn kind(&self) -> RunKind {
        RunKind::HttpClient
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run.http_client.as_ref().ok_or_else(|| {
            EngineError::InvalidContext("httpClient config missing".to_string())
        })?;

        let url = call.render(&config.url)?;
        let method: reqwest::Method = config
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| {
                EngineError::from(
                    ActionError::new(format!(
                        "invalid HTTP method '{}'",
                        config.method.as_deref().unwrap_or_default()
                    ))
                    .with_type("http"),
                )
            })?;

        let mut request = self
            .client
            .request(method, &url)
            .timeout(call.timeout(config.timeout_duration.as_deref()));

        for (name, value) in call.render_map(&config.headers)? {
            request = request.header(name, value);
        }
        let params = call.render_map(&config.params)?;
        if !params.is_empty() {
            request = request.query(&params);
        }
        if let Some(data) = &config.data {
            let body = call.render_value(data)?;
            request = match &body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| {
                let mut err = ActionError::new(format!("request to {} failed: {}", url, e))
                    .with_type("http");
                if e.is_timeout() {
                    err = err.with_code("TIMEOUT");
                }
                EngineError::from(err)
            })?,
            _ = call.cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).to_string()),
                )
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| {
                EngineError::from(
                    ActionError::new(format!("failed to read response body: {}", e))
                        .with_type("http"),
                )
            })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(serde_json::json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        }))
    }
}
