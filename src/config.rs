//! Engine configuration
//!
//! Defaults, environment-based overrides and validation for the
//! process-level knobs that are not part of a workflow document.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Default executor timeout applied when a `timeoutDuration` is absent
/// or unparseable
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Fallback executor timeout in seconds
    pub default_timeout_secs: u64,
    /// Root directory for the `file(...)` accessor when the workflow
    /// does not set one
    pub fs_root: PathBuf,
    /// Offline mode handed to capable executors
    pub offline: bool,
    /// Python interpreter used by the python executor
    pub python_bin: String,
    /// Base URL of the chat completion endpoint
    pub llm_base_url: String,
    /// Backend label recorded in response metadata
    pub llm_backend: String,
    /// Synthesis command template for the tts executor; `{text}`,
    /// `{voice}` and `{output}` are substituted
    pub tts_command: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            fs_root: PathBuf::from("."),
            offline: false,
            python_bin: "python3".to_string(),
            llm_base_url: "http://localhost:11434".to_string(),
            llm_backend: "ollama".to_string(),
            tts_command: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults with `FLOWGATE_*` environment overrides
    pub fn load_from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FLOWGATE_DEFAULT_TIMEOUT") {
            config.default_timeout_secs = parse_timeout(Some(&val), DEFAULT_TIMEOUT).as_secs();
        }
        if let Ok(val) = std::env::var("FLOWGATE_FS_ROOT") {
            config.fs_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLOWGATE_OFFLINE") {
            config.offline = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("FLOWGATE_PYTHON_BIN") {
            config.python_bin = val;
        }
        if let Ok(val) = std::env::var("FLOWGATE_LLM_BASE_URL") {
            config.llm_base_url = val;
        }
        if let Ok(val) = std::env::var("FLOWGATE_LLM_BACKEND") {
            config.llm_backend = val;
        }
        if let Ok(val) = std::env::var("FLOWGATE_TTS_COMMAND") {
            config.tts_command = Some(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_timeout_secs == 0 {
            return Err(EngineError::Config(
                "default timeout must be non-zero".to_string(),
            ));
        }
        if self.python_bin.is_empty() {
            return Err(EngineError::Config(
                "python interpreter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Fallback timeout as a `Duration`
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Parse a `timeoutDuration` string ("30s", "2m", bare seconds).
/// An absent or unparseable value falls back to `default` rather than
/// failing.
pub fn parse_timeout(raw: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = raw else {
        return default;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    match humantime::parse_duration(trimmed) {
        Ok(d) => d,
        Err(e) => {
            warn!(timeout = trimmed, error = %e, "unparseable timeout, using default");
            default
        }
    }
}
