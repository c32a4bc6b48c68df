//! Subprocess executor

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{RunKind, RunSpec};

use super::{process_output_value, run_command, ActionExecutor, ExecCall};

/// Executor for `exec` resources
pub struct ExecExecutor;

impl ExecExecutor {
    /// Create the executor
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExecExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for ExecExecutor {
    fn kind(&self) -> RunKind {
        RunKind::Exec
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run
            .exec
            .as_ref()
            .ok_or_else(|| EngineError::InvalidContext("exec config missing".to_string()))?;

        let rendered = call.render(&config.command)?;
        let env = call.render_map(&config.env)?;

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(&rendered).envs(&env);

        let timeout = call.timeout(config.timeout_duration.as_deref());
        let output = run_command(command, timeout, &call.cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            return Err(ActionError::new(format!(
                "command exited with status {}: {}",
                code,
                stderr.trim_end()
            ))
            .with_type("process")
            .with_status(i64::from(code))
            .into());
        }

        Ok(process_output_value(&output))
    }
}
