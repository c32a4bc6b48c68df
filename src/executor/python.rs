//! Python script executor

use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{RunKind, RunSpec};

use super::{process_output_value, run_command, ActionExecutor, ExecCall};

/// Executor for `python` resources
pub struct PythonExecutor {
    python_bin: String,
}

impl PythonExecutor {
    /// Create an executor using the given interpreter
    pub fn new(python_bin: String) -> Self {
        Self { python_bin }
    }
}

#[async_trait]
impl ActionExecutor for PythonExecutor {
    fn kind(&self) -> RunKind {
        RunKind::Python
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run
            .python
            .as_ref()
            .ok_or_else(|| EngineError::InvalidContext("python config missing".to_string()))?;

        let script = call.render(&config.script)?;
        let env = call.render_map(&config.env)?;

        let mut staged = tempfile::Builder::new()
            .prefix("flowgate-")
            .suffix(".py")
            .tempfile()?;
        staged.write_all(script.as_bytes())?;
        staged.flush()?;

        let mut command = tokio::process::Command::new(&self.python_bin);
        command.arg(staged.path()).envs(&env);

        let timeout = call.timeout(config.timeout_duration.as_deref());
        let output = run_command(command, timeout, &call.cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            return Err(ActionError::new(format!(
                "python script exited with status {}: {}",
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
