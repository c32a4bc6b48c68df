//! Error types for the workflow engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Comprehensive error types for workflow execution
#[derive(Error, Debug)]
pub enum EngineError {
    /// Dependency graph construction failed (duplicate id, cycle, unknown dep/target)
    #[error("failed to build dependency graph: {0}")]
    Graph(String),

    /// Execution context is missing or malformed
    #[error("invalid execution context: {0}")]
    InvalidContext(String),

    /// Request validation rule violated; message lists every failing field
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),

    /// Preflight validation expression was falsy
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    /// An executor returned an error for a resource
    #[error("resource '{action_id}' failed: {message}")]
    Executor {
        /// Action ID of the failing resource
        action_id: String,
        /// Original executor error, preserved verbatim
        message: String,
    },

    /// Failure raised inside an action executor
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Expression evaluation failed outside an executor
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),

    /// No executor registered for the resource kind
    #[error("{0} executor not available")]
    ExecutorUnavailable(String),

    /// Target resource was never executed (skipped or pruned away)
    #[error("target resource '{0}' not found in outputs")]
    TargetNotFound(String),

    /// Target resource executed but produced no output value
    #[error("target resource '{0}' produced no output")]
    NoOutput(String),

    /// Execution was cancelled via the request cancel token
    #[error("cancelled")]
    Cancelled,

    /// An executor panicked; the panic payload is preserved
    #[error("engine panic: {0}")]
    Panic(String),

    /// Engine configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured preflight failure carrying the workflow-configured code
/// for HTTP-style mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("preflight check failed ({code}): {message}")]
pub struct PreflightError {
    /// Configured error code (HTTP-style), 0 when unconfigured
    pub code: i64,
    /// Configured or generated message
    pub message: String,
}

impl PreflightError {
    /// Generic preflight failure for an unconfigured check
    pub fn generic(expr: &str) -> Self {
        Self {
            code: 0,
            message: format!("preflight validation failed: {}", expr),
        }
    }
}

/// Structured failure from an action executor, carrying the fields the
/// onError `when` gate can inspect
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ActionError {
    /// Human-readable failure description
    pub message: String,
    /// Machine-readable error code
    pub code: Option<String>,
    /// Error family (e.g. "http", "llm", "process")
    pub error_type: Option<String>,
    /// HTTP-style status or process exit code
    pub status_code: Option<i64>,
}

impl ActionError {
    /// Message-only executor failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            error_type: None,
            status_code: None,
        }
    }

    /// Attach an error family label
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Attach a machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a status or exit code
    pub fn with_status(mut self, status: i64) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidContext(format!("JSON error: {}", err))
    }
}

impl From<crate::eval::EvalError> for EngineError {
    fn from(err: crate::eval::EvalError) -> Self {
        EngineError::Evaluation(err.to_string())
    }
}
