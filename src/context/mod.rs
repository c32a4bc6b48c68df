//! Execution context
//!
//! Per-request state the engine owns: the request shadow, resource
//! outputs, iteration scope, session/memory store handles and the
//! accessor surface exposed to executors and to the expression
//! environment.

pub mod env;
pub mod request;
pub mod store;

pub use request::{FileUpload, RequestContext};
pub use store::{KvStore, SessionRegistry};

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::restrict::glob_match;

/// Context shared with executors and env closures
pub type SharedContext = Arc<RwLock<ExecutionContext>>;

/// Auto-detect priority for unhinted lookups
const AUTO_DETECT_ORDER: [&str; 7] = [
    "query", "header", "body", "file", "memory", "session", "output",
];

/// Model/backend pair recorded for the last chat dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMetadata {
    /// Model name after placeholder resolution
    pub model: String,
    /// Backend label (e.g. "ollama")
    pub backend: String,
}

/// Iteration state exposed while a resource fans out over items
#[derive(Debug, Clone)]
pub struct ItemScope {
    /// Element for the current iteration
    pub current: Value,
    /// Zero-based iteration index
    pub index: usize,
    /// Total element count
    pub count: usize,
    /// Previous element, null on the first iteration
    pub prev: Value,
    /// Next element, null on the last iteration
    pub next: Value,
    /// The full sequence being iterated
    pub items: Vec<Value>,
    /// User-declared item variable name, when different from `item`
    pub var_name: Option<String>,
}

/// Per-request execution context
pub struct ExecutionContext {
    /// Request shadow, absent for requestless executions
    pub request: Option<RequestContext>,
    /// Last chat model/backend, surfaced in `_meta`
    pub llm_metadata: Option<LlmMetadata>,
    /// Last audio artifact written by the tts executor
    pub tts_output_file: Option<PathBuf>,
    outputs: HashMap<String, Value>,
    item_scope: Option<ItemScope>,
    item_values: HashMap<String, Vec<Value>>,
    session: Arc<KvStore>,
    memory: Arc<KvStore>,
    allowed_params: Vec<String>,
    allowed_headers: Vec<String>,
    fs_root: PathBuf,
}

impl ExecutionContext {
    /// Create a context over a request shadow and store handles
    pub fn new(
        request: Option<RequestContext>,
        session: Arc<KvStore>,
        memory: Arc<KvStore>,
    ) -> Self {
        Self {
            request,
            llm_metadata: None,
            tts_output_file: None,
            outputs: HashMap::new(),
            item_scope: None,
            item_values: HashMap::new(),
            session,
            memory,
            allowed_params: Vec::new(),
            allowed_headers: Vec::new(),
            fs_root: PathBuf::from("."),
        }
    }

    /// Install request-data allow-lists; empty lists allow everything
    pub fn set_allow_lists(&mut self, params: Vec<String>, headers: Vec<String>) {
        self.allowed_params = params;
        self.allowed_headers = headers;
    }

    /// Root directory for the `file(...)` accessor
    pub fn set_fs_root(&mut self, root: impl Into<PathBuf>) {
        self.fs_root = root.into();
    }

    /// Session store handle
    pub fn session_store(&self) -> Arc<KvStore> {
        self.session.clone()
    }

    /// Memory store handle
    pub fn memory_store(&self) -> Arc<KvStore> {
        self.memory.clone()
    }

    /// Session id carried by the request, if any
    pub fn session_id(&self) -> Option<String> {
        self.request.as_ref().and_then(|r| r.session_id.clone())
    }

    /// Record a resource output
    pub fn set_output(&mut self, action_id: impl Into<String>, value: Value) {
        self.outputs.insert(action_id.into(), value);
    }

    /// Output of a completed resource
    pub fn output(&self, action_id: &str) -> Option<Value> {
        self.outputs.get(action_id).cloned()
    }

    /// Whether the resource has produced an output this request
    pub fn has_output(&self, action_id: &str) -> bool {
        self.outputs.contains_key(action_id)
    }

    /// Enter an items iteration scope
    pub fn enter_item_scope(&mut self, scope: ItemScope) {
        self.item_scope = Some(scope);
    }

    /// Leave the items iteration scope
    pub fn exit_item_scope(&mut self) {
        self.item_scope = None;
    }

    /// Whether the context is currently inside an items iteration
    pub fn in_iteration(&self) -> bool {
        self.item_scope.is_some()
    }

    /// Current iteration scope
    pub fn item_scope(&self) -> Option<&ItemScope> {
        self.item_scope.as_ref()
    }

    /// Append a per-item result for a fanned-out resource
    pub fn push_item_value(&mut self, action_id: impl Into<String>, value: Value) {
        self.item_values.entry(action_id.into()).or_default().push(value);
    }

    /// Full sequence collected for a fanned-out resource
    pub fn item_values_for(&self, action_id: &str) -> Vec<Value> {
        self.item_values.get(action_id).cloned().unwrap_or_default()
    }

    /// Retrieve a named value. With a hint, only that source is
    /// consulted. Without one, the current iteration element answers
    /// the names `item` and `current` first (shadowing request fields
    /// of those names while fanning out); every other name goes
    /// through the fixed priority query → header → body → file →
    /// memory → session → output. Missing names resolve to null;
    /// allow-list violations and unknown hints error.
    pub fn get(&self, name: &str, hint: Option<&str>) -> EngineResult<Value> {
        match hint {
            Some("param") => Ok(self.lookup_query(name, true)?.unwrap_or(Value::Null)),
            Some("header") => Ok(self.lookup_header(name)?.unwrap_or(Value::Null)),
            Some("body") => Ok(self.lookup_body(name, true)?.unwrap_or(Value::Null)),
            Some("memory") => Ok(self.memory.get(name).unwrap_or(Value::Null)),
            Some("session") => Ok(self.session.get(name).unwrap_or(Value::Null)),
            Some("output") => Ok(self.output(name).unwrap_or(Value::Null)),
            Some(other) => Err(EngineError::InvalidContext(format!(
                "unknown lookup hint '{}'",
                other
            ))),
            None => {
                if let Some(value) = self.item_lookup(name) {
                    return Ok(value);
                }
                for source in AUTO_DETECT_ORDER {
                    let found = match source {
                        "query" => self.lookup_query(name, true)?,
                        "header" => self.lookup_header(name)?,
                        "body" => self.lookup_body(name, true)?,
                        "file" => self
                            .request
                            .as_ref()
                            .and_then(|r| r.file(name))
                            .map(|f| Value::String(f.path.display().to_string())),
                        "memory" => self.memory.get(name),
                        "session" => self.session.get(name),
                        "output" => self.output(name),
                        _ => None,
                    };
                    if let Some(value) = found {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
        }
    }

    /// Alias of [`get`](Self::get) kept for executor-facing symmetry
    pub fn input(&self, name: &str, hint: Option<&str>) -> EngineResult<Value> {
        self.get(name, hint)
    }

    /// Query parameter lookup with allow-list filtering
    pub fn get_param(&self, name: &str) -> EngineResult<Value> {
        Ok(self.lookup_query(name, true)?.unwrap_or(Value::Null))
    }

    /// Case-insensitive header lookup with allow-list filtering
    pub fn get_header(&self, name: &str) -> EngineResult<Value> {
        Ok(self.lookup_header(name)?.unwrap_or(Value::Null))
    }

    /// Merged view of query, body and headers, respecting allow-lists
    pub fn request_data(&self) -> EngineResult<serde_json::Map<String, Value>> {
        let mut merged = serde_json::Map::new();
        let Some(request) = self.request.as_ref() else {
            return Ok(merged);
        };
        for (k, v) in &request.query {
            if self.param_allowed(k) {
                merged.insert(k.clone(), Value::String(v.clone()));
            }
        }
        for (k, v) in &request.body {
            if self.param_allowed(k) {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &request.headers {
            if self.header_allowed(k) {
                merged.insert(k.clone(), Value::String(v.clone()));
            }
        }
        Ok(merged)
    }

    /// Content of an uploaded file, null when no such upload exists
    pub fn get_request_file_content(&self, name: &str) -> EngineResult<Value> {
        match self.request.as_ref().and_then(|r| r.file(name)) {
            Some(file) => Ok(Value::String(std::fs::read_to_string(&file.path)?)),
            None => Ok(Value::Null),
        }
    }

    /// Staged path of an uploaded file
    pub fn get_request_file_path(&self, name: &str) -> Value {
        self.request
            .as_ref()
            .and_then(|r| r.file(name))
            .map(|f| Value::String(f.path.display().to_string()))
            .unwrap_or(Value::Null)
    }

    /// MIME type of an uploaded file
    pub fn get_request_file_type(&self, name: &str) -> Value {
        self.request
            .as_ref()
            .and_then(|r| r.file(name))
            .map(|f| Value::String(f.mime_type.clone()))
            .unwrap_or(Value::Null)
    }

    /// Paths of uploaded files matching a MIME type; `image` and
    /// `image/*` both match every image subtype
    pub fn get_request_files_by_type(&self, mime: &str) -> Value {
        let Some(request) = self.request.as_ref() else {
            return Value::Array(Vec::new());
        };
        let paths: Vec<Value> = request
            .files
            .iter()
            .filter(|f| mime_matches(mime, &f.mime_type))
            .map(|f| Value::String(f.path.display().to_string()))
            .collect();
        Value::Array(paths)
    }

    /// Engine metadata lookup; unknown keys resolve to null
    pub fn info(&self, key: &str) -> Value {
        match key {
            "request.method" => self
                .request
                .as_ref()
                .map(|r| Value::String(r.method.clone()))
                .unwrap_or(Value::Null),
            "request.path" => self
                .request
                .as_ref()
                .map(|r| Value::String(r.path.clone()))
                .unwrap_or(Value::Null),
            "request.id" => self
                .request
                .as_ref()
                .map(|r| Value::String(r.id.clone()))
                .unwrap_or(Value::Null),
            "filecount" => self
                .request
                .as_ref()
                .map(|r| Value::from(r.files.len()))
                .unwrap_or(Value::from(0)),
            "files" => self
                .request
                .as_ref()
                .map(|r| {
                    Value::Array(
                        r.files
                            .iter()
                            .map(|f| Value::String(f.path.display().to_string()))
                            .collect(),
                    )
                })
                .unwrap_or_else(|| Value::Array(Vec::new())),
            "filenames" => self
                .request
                .as_ref()
                .map(|r| {
                    Value::Array(r.files.iter().map(|f| Value::String(f.name.clone())).collect())
                })
                .unwrap_or_else(|| Value::Array(Vec::new())),
            "filetypes" => self
                .request
                .as_ref()
                .map(|r| {
                    Value::Array(
                        r.files
                            .iter()
                            .map(|f| Value::String(f.mime_type.clone()))
                            .collect(),
                    )
                })
                .unwrap_or_else(|| Value::Array(Vec::new())),
            "current_time" | "timestamp" => {
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            "session_id" | "sessionId" => self
                .session_id()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "index" | "count" | "current" => self.item(Some(key)),
            _ => Value::Null,
        }
    }

    /// Current-element lookup for unhinted `get` calls. Only `item`
    /// and `current` resolve here, and only while inside an
    /// iteration; the companions (`index`, `count`, `prev`, `next`,
    /// `items`, the user variable) are reachable through
    /// `info`/`item` and the env literals, so request fields with
    /// those names keep their place in the auto-detect chain.
    fn item_lookup(&self, name: &str) -> Option<Value> {
        let scope = self.item_scope.as_ref()?;
        match name {
            "item" | "current" => Some(scope.current.clone()),
            _ => None,
        }
    }

    /// Iteration accessor; `which` defaults to the current element
    pub fn item(&self, which: Option<&str>) -> Value {
        let Some(scope) = self.item_scope.as_ref() else {
            return Value::Null;
        };
        match which.unwrap_or("current") {
            "current" | "item" => scope.current.clone(),
            "index" => Value::from(scope.index),
            "count" => Value::from(scope.count),
            "prev" => scope.prev.clone(),
            "next" => scope.next.clone(),
            "items" => Value::Array(scope.items.clone()),
            name if Some(name) == scope.var_name.as_deref() => scope.current.clone(),
            _ => Value::Null,
        }
    }

    /// Filesystem accessor relative to the context root: glob pattern,
    /// optional `mime:<type>` filter, optional `first`/`last`/`all`/
    /// `count` selector. `agent:` paths are not implemented.
    pub fn file(&self, pattern: &str, selectors: &[String]) -> EngineResult<Value> {
        if pattern.starts_with("agent:") {
            return Err(EngineError::InvalidContext(
                "agent: file paths are not implemented".to_string(),
            ));
        }

        let mut matches: Vec<(String, PathBuf)> = Vec::new();
        collect_files(&self.fs_root, &self.fs_root, &mut matches)?;
        matches.retain(|(rel, _)| glob_match(pattern, rel));
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        let mut selector = "all";
        for sel in selectors {
            if let Some(mime) = sel.strip_prefix("mime:") {
                matches.retain(|(_, abs)| mime_matches(mime, mime_for_path(abs)));
            } else {
                selector = sel.as_str();
            }
        }

        let paths: Vec<Value> = matches
            .iter()
            .map(|(_, abs)| Value::String(abs.display().to_string()))
            .collect();
        match selector {
            "first" => Ok(paths.first().cloned().unwrap_or(Value::Null)),
            "last" => Ok(paths.last().cloned().unwrap_or(Value::Null)),
            "count" => Ok(Value::from(paths.len())),
            "all" => Ok(Value::Array(paths)),
            other => Err(EngineError::InvalidContext(format!(
                "unknown file selector '{}'",
                other
            ))),
        }
    }

    fn param_allowed(&self, name: &str) -> bool {
        self.allowed_params.is_empty() || self.allowed_params.iter().any(|p| p == name)
    }

    fn header_allowed(&self, name: &str) -> bool {
        self.allowed_headers.is_empty()
            || self
                .allowed_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
    }

    fn lookup_query(&self, name: &str, enforce: bool) -> EngineResult<Option<Value>> {
        if enforce && !self.param_allowed(name) {
            return Err(EngineError::InvalidContext(format!(
                "parameter '{}' is not in the allowed list",
                name
            )));
        }
        Ok(self
            .request
            .as_ref()
            .and_then(|r| r.query.get(name))
            .map(|v| Value::String(v.clone())))
    }

    fn lookup_body(&self, name: &str, enforce: bool) -> EngineResult<Option<Value>> {
        if enforce && !self.param_allowed(name) {
            return Err(EngineError::InvalidContext(format!(
                "parameter '{}' is not in the allowed list",
                name
            )));
        }
        Ok(self
            .request
            .as_ref()
            .and_then(|r| r.body.get(name))
            .cloned())
    }

    fn lookup_header(&self, name: &str) -> EngineResult<Option<Value>> {
        if !self.header_allowed(name) {
            return Err(EngineError::InvalidContext(format!(
                "header '{}' is not in the allowed list",
                name
            )));
        }
        Ok(self
            .request
            .as_ref()
            .and_then(|r| r.header(name))
            .map(|v| Value::String(v.to_string())))
    }
}

/// MIME match: exact, `type/*` wildcard, or bare top-level type
fn mime_matches(pattern: &str, mime: &str) -> bool {
    if pattern == mime {
        return true;
    }
    let class = pattern.strip_suffix("/*").unwrap_or(pattern);
    !class.contains('/') && mime.split('/').next() == Some(class)
}

/// MIME type inferred from a file extension
fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> EngineResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, path.clone()));
        }
    }
    Ok(())
}
