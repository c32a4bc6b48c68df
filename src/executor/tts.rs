//! Text-to-speech executor
//!
//! Shells out to a configured synthesis command and records the audio
//! artifact path on the execution context.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{RunKind, RunSpec};

use super::{run_command, ActionExecutor, ExecCall};

/// Executor for `tts` resources
pub struct TtsExecutor {
    command_template: Option<String>,
}

impl TtsExecutor {
    /// Create an executor with an engine-level command template;
    /// resources may override it per call
    pub fn new(command_template: Option<String>) -> Self {
        Self { command_template }
    }
}

#[async_trait]
impl ActionExecutor for TtsExecutor {
    fn kind(&self) -> RunKind {
        RunKind::Tts
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run
            .tts
            .as_ref()
            .ok_or_else(|| EngineError::InvalidContext("tts config missing".to_string()))?;

        let template = config
            .command
            .clone()
            .or_else(|| self.command_template.clone())
            .ok_or_else(|| {
                EngineError::from(
                    ActionError::new("no tts synthesis command configured").with_type("tts"),
                )
            })?;

        let text = call.render(&config.text)?;
        let voice = match &config.voice {
            Some(voice) => call.render(voice)?,
            None => "default".to_string(),
        };
        let output_dir = match &config.output_dir {
            Some(dir) => PathBuf::from(call.render(dir)?),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&output_dir)?;
        let output_file = output_dir.join(format!("tts-{}.wav", Uuid::new_v4()));

        let rendered = template
            .replace("{text}", &shell_quote(&text))
            .replace("{voice}", &shell_quote(&voice))
            .replace("{output}", &shell_quote(&output_file.display().to_string()));

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(&rendered);

        let timeout = call.timeout(config.timeout_duration.as_deref());
        let output = run_command(command, timeout, &call.cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionError::new(format!(
                "synthesis command failed: {}",
                stderr.trim_end()
            ))
            .with_type("tts")
            .with_status(i64::from(output.status.code().unwrap_or(-1)))
            .into());
        }

        call.ctx.write().tts_output_file = Some(output_file.clone());

        Ok(serde_json::json!({
            "file": output_file.display().to_string(),
            "voice": voice,
        }))
    }
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_embedded_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("plain"), "'plain'");
    }
}
