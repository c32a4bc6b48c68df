//! Workflow document model
//!
//! A workflow names a set of resources with typed actions and a single
//! target whose output becomes the workflow result. Documents are plain
//! serde data (YAML or JSON); field names follow the camelCase document
//! form with `actionID`-style aliases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// A workflow document: metadata, settings and an ordered resource list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow metadata
    pub metadata: Metadata,
    /// Engine-facing workflow settings
    #[serde(default)]
    pub settings: Settings,
    /// Resources in document order
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Workflow {
    /// Parse a workflow document from YAML (JSON is a YAML subset)
    pub fn from_yaml(doc: &str) -> EngineResult<Self> {
        serde_yaml::from_str(doc)
            .map_err(|e| EngineError::InvalidContext(format!("workflow document: {}", e)))
    }

    /// Look up a resource by action ID
    pub fn resource(&self, action_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.action_id == action_id)
    }
}

/// Workflow metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Workflow name
    pub name: String,
    /// Workflow version
    #[serde(default)]
    pub version: String,
    /// Action ID whose output is the workflow result
    #[serde(rename = "targetActionID", alias = "targetActionId")]
    pub target_action_id: String,
}

/// Workflow-level settings consumed by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// When non-empty, the exclusive set of request params/body fields
    /// visible to accessors
    #[serde(default)]
    pub allowed_params: Vec<String>,
    /// When non-empty, the exclusive set of request headers visible to
    /// accessors
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Root directory for the `file(...)` accessor
    #[serde(default)]
    pub fs_root: Option<String>,
    /// Offline mode flag handed to capable executors
    #[serde(default)]
    pub offline: bool,
}

/// A named unit of work inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Unique name within the workflow
    #[serde(rename = "actionID", alias = "actionId")]
    pub action_id: String,
    /// Action IDs this resource depends on
    #[serde(default)]
    pub requires: Vec<String>,
    /// Optional fan-out selector; see the items iterator
    #[serde(default)]
    pub items: Vec<Expression>,
    /// Name under which the current element is bound during iteration,
    /// in addition to the standard `item` binding
    #[serde(default)]
    pub item_var: Option<String>,
    /// What the resource runs
    pub run: RunSpec,
}

/// The run block of a resource: exactly one action variant, or a pure
/// `expr` block, plus execution gates and error policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// LLM chat action
    pub chat: Option<ChatConfig>,
    /// HTTP client action
    pub http_client: Option<HttpConfig>,
    /// SQL query action
    pub sql: Option<SqlConfig>,
    /// Python script action
    pub python: Option<PythonConfig>,
    /// Subprocess action
    pub exec: Option<ExecConfig>,
    /// Text-to-speech action
    pub tts: Option<TtsConfig>,
    /// API response action
    pub api_response: Option<ApiResponseConfig>,
    /// Expressions run for side effects before (or instead of) the variant
    #[serde(default)]
    pub expr: Vec<Expression>,
    /// First truthy condition skips the resource
    #[serde(default)]
    pub skip_condition: Vec<Expression>,
    /// Pre-dispatch boolean gate with a configurable error
    pub preflight_check: Option<PreflightCheck>,
    /// Request validation applied before dispatch
    pub validation: Option<ValidationSpec>,
    /// HTTP methods the resource is limited to
    #[serde(default, rename = "restrictToHTTPMethods", alias = "restrictToHttpMethods")]
    pub restrict_to_http_methods: Vec<String>,
    /// Route globs the resource is limited to
    #[serde(default)]
    pub restrict_to_routes: Vec<String>,
    /// Error-handling policy for executor failures
    pub on_error: Option<OnError>,
}

impl RunSpec {
    /// The action variant tag, if any
    pub fn kind(&self) -> Option<RunKind> {
        if self.chat.is_some() {
            Some(RunKind::Chat)
        } else if self.http_client.is_some() {
            Some(RunKind::HttpClient)
        } else if self.sql.is_some() {
            Some(RunKind::Sql)
        } else if self.python.is_some() {
            Some(RunKind::Python)
        } else if self.exec.is_some() {
            Some(RunKind::Exec)
        } else if self.tts.is_some() {
            Some(RunKind::Tts)
        } else if self.api_response.is_some() {
            Some(RunKind::ApiResponse)
        } else {
            None
        }
    }

    /// Reject run blocks declaring more than one action variant
    pub fn validate_variant(&self, action_id: &str) -> EngineResult<()> {
        let count = [
            self.chat.is_some(),
            self.http_client.is_some(),
            self.sql.is_some(),
            self.python.is_some(),
            self.exec.is_some(),
            self.tts.is_some(),
            self.api_response.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if count > 1 {
            return Err(EngineError::InvalidContext(format!(
                "resource '{}' declares {} action variants, expected at most one",
                action_id, count
            )));
        }
        Ok(())
    }
}

/// Resource kind tag used for executor dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunKind {
    /// LLM chat completion
    Chat,
    /// HTTP call
    HttpClient,
    /// SQL query
    Sql,
    /// Python script
    Python,
    /// Subprocess execution
    Exec,
    /// Text-to-speech synthesis
    Tts,
    /// API response materialization
    ApiResponse,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunKind::Chat => "chat",
            RunKind::HttpClient => "httpClient",
            RunKind::Sql => "sql",
            RunKind::Python => "python",
            RunKind::Exec => "exec",
            RunKind::Tts => "tts",
            RunKind::ApiResponse => "apiResponse",
        };
        write!(f, "{}", name)
    }
}

/// A raw expression string. A value containing `{{…}}` is a template;
/// otherwise it is evaluated as a bare expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression {
    /// Raw expression or template text
    pub raw: String,
}

impl Expression {
    /// Wrap raw expression text
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Whether the raw text contains template placeholders
    pub fn is_template(&self) -> bool {
        self.raw.contains("{{")
    }
}

impl From<&str> for Expression {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Preflight gate: boolean validations plus an optional structured error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    /// Expressions that must all be truthy
    #[serde(default)]
    pub validations: Vec<Expression>,
    /// Error surfaced when a validation is falsy
    pub error: Option<PreflightErrorSpec>,
}

/// Configured preflight error shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightErrorSpec {
    /// HTTP-style error code
    #[serde(default)]
    pub code: i64,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Request validation block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSpec {
    /// Fields that must be present and non-null
    #[serde(default)]
    pub required: Vec<String>,
    /// Typed per-field rules
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

/// Typed rules for a single field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    /// Field name in the merged request data
    pub field: String,
    /// Expected value type
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    /// Inclusive numeric minimum
    pub min: Option<f64>,
    /// Inclusive numeric maximum
    pub max: Option<f64>,
    /// Minimum string length in runes
    pub min_length: Option<usize>,
    /// Maximum string length in runes
    pub max_length: Option<usize>,
    /// Regex the string value must match
    pub pattern: Option<String>,
    /// Literal set the value must equal one of
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<serde_json::Value>>,
    /// Minimum array length
    pub min_items: Option<usize>,
    /// Maximum array length
    pub max_items: Option<usize>,
    /// Boolean expressions evaluated against the env; falsy fails
    #[serde(default)]
    pub custom_rules: Vec<CustomRule>,
}

/// A custom validation expression with its failure message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    /// Boolean expression
    pub expr: Expression,
    /// Message reported when the expression is falsy
    pub message: Option<String>,
}

/// Value types recognized by the validation gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Integer (numeric strings coerce)
    Integer,
    /// Float (numeric strings coerce)
    Number,
    /// Boolean
    Boolean,
    /// Sequence
    Array,
    /// Map
    Object,
    /// RFC-5321-shaped email address
    Email,
    /// Absolute URL
    Url,
    /// UUID string
    Uuid,
}

/// Error-handling policy for executor failures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnError {
    /// What to do when the executor errors
    #[serde(default)]
    pub action: OnErrorAction,
    /// Gate expressions evaluated with an `error` object bound; any
    /// truthy result applies the action, empty means always
    #[serde(default)]
    pub when: Vec<Expression>,
    /// Retry budget for the `retry` action
    #[serde(default)]
    pub max_retries: u32,
    /// Output substituted under `continue`; templates resolved,
    /// maps and arrays walked
    pub fallback: Option<serde_json::Value>,
    /// Diagnostic expressions run best-effort after handling
    #[serde(default)]
    pub expr: Vec<Expression>,
}

/// onError action tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorAction {
    /// Propagate the error and abort execution
    #[default]
    Fail,
    /// Re-dispatch up to `max_retries` times
    Retry,
    /// Suppress the error and continue with a fallback output
    Continue,
}

/// LLM chat action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Model name; may contain expression placeholders
    pub model: String,
    /// Prompt template
    #[serde(default)]
    pub prompt: Option<String>,
    /// Role for the prompt message
    #[serde(default)]
    pub role: Option<String>,
    /// Additional prior messages
    #[serde(default)]
    pub scenario: Vec<ChatMessage>,
    /// Tool definitions offered to the model
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// Request a JSON-shaped response
    #[serde(default)]
    pub json_response: bool,
    /// Keys expected in the JSON response
    #[serde(default)]
    pub json_response_keys: Vec<String>,
    /// Per-call timeout, e.g. "60s"
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// One message of a chat scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role (system, user, assistant)
    pub role: String,
    /// Message text; may contain placeholders
    pub prompt: String,
}

/// A tool the chat model may invoke through the engine's tool executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Human description handed to the model
    #[serde(default)]
    pub description: Option<String>,
    /// Script template run when the tool is invoked
    #[serde(default)]
    pub script: Option<Expression>,
    /// JSON-schema-shaped parameter description
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// HTTP client action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// HTTP method, GET when empty
    #[serde(default)]
    pub method: Option<String>,
    /// Request URL; may contain placeholders
    pub url: String,
    /// Request body
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Request headers; values may contain placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters; values may contain placeholders
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Per-call timeout, e.g. "30s"
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// SQL query action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlConfig {
    /// Database location (file path or `:memory:`)
    pub connection: String,
    /// Query text; may contain placeholders
    pub query: String,
    /// Positional bind parameters, evaluated before binding
    #[serde(default)]
    pub params: Vec<Expression>,
    /// Per-call timeout
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// Python script action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonConfig {
    /// Script source; may contain placeholders
    pub script: String,
    /// Environment variables for the interpreter
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// Subprocess action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// Shell command; may contain placeholders
    pub command: String,
    /// Environment variables for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// Text-to-speech action configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsConfig {
    /// Text to synthesize; may contain placeholders
    pub text: String,
    /// Voice identifier
    #[serde(default)]
    pub voice: Option<String>,
    /// Directory the audio artifact is written into
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Synthesis command template overriding the engine default;
    /// `{text}`, `{voice}` and `{output}` are substituted
    #[serde(default)]
    pub command: Option<String>,
    /// Per-call timeout
    #[serde(default)]
    pub timeout_duration: Option<String>,
}

/// API response action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponseConfig {
    /// Success flag placed on the envelope
    #[serde(default = "default_true")]
    pub success: bool,
    /// Response payload; every string leaf is a template
    pub response: serde_json::Value,
    /// Optional response metadata
    #[serde(default)]
    pub meta: Option<MetaConfig>,
}

/// Envelope metadata configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Headers surfaced under `_meta.headers`
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}
