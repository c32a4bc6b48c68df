//! Declarative request-driven workflow engine
//!
//! This crate executes workflow documents describing named resources
//! with typed actions (LLM chat, HTTP call, SQL query, Python script,
//! subprocess, text-to-speech, expression block, API response):
//! - Builds and topologically sorts the dependency graph, pruned to
//!   the designated target resource
//! - Shadows HTTP-like request data into a scoped execution context
//!   with session and process-wide memory stores
//! - Gates each resource through restrictions, skip conditions, input
//!   validation and preflight checks
//! - Dispatches to pluggable executors with retry/continue/fallback
//!   error handling and item fan-out iteration
//! - Resolves the target output, unwrapping the API-response envelope

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cancel;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod eval;
pub mod executor;
pub mod graph;
pub mod response;
pub mod restrict;
pub mod validation;
pub mod workflow;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use context::{ExecutionContext, KvStore, RequestContext, SessionRegistry, SharedContext};
pub use engine::Engine;
pub use error::{ActionError, EngineError, EngineResult, PreflightError};
pub use eval::{Env, EnvValue, EvalError, Evaluator, SimpleEvaluator};
pub use executor::{ActionExecutor, ChatCapabilities, ExecCall, ExecutorRegistry, ToolExecutor};
pub use graph::DependencyGraph;
pub use workflow::{Expression, Resource, RunKind, RunSpec, Workflow};

/// Initialize process-wide tracing from `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
