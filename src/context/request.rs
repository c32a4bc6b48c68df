//! Request shadow
//!
//! HTTP-like context carried by a workflow execution: method, path,
//! headers, query, body, uploaded files and session identity. The
//! engine never touches a live socket; callers hand it this shadow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Header carrying an explicit session id
pub const SESSION_HEADER: &str = "x-session-id";
/// Cookie and query parameter carrying a session id
pub const SESSION_KEY: &str = "session_id";

/// An uploaded file attached to the request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    /// Form field or file name
    pub name: String,
    /// Location on disk where the upload was staged
    pub path: PathBuf,
    /// MIME type reported for the upload
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
}

/// HTTP-like request context shadowed into the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Decoded request body
    pub body: serde_json::Map<String, Value>,
    /// Uploaded files
    pub files: Vec<FileUpload>,
    /// Client address
    pub ip: String,
    /// Request id
    pub id: String,
    /// Session id, inferred when absent
    pub session_id: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: serde_json::Map::new(),
            files: Vec::new(),
            ip: String::new(),
            id: Uuid::new_v4().to_string(),
            session_id: None,
        }
    }
}

impl RequestContext {
    /// Create a request shadow for a method and path
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Cookie value from the `Cookie` header
    pub fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.header("cookie")?;
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            if key == name {
                return Some(parts.next().unwrap_or("").trim().to_string());
            }
        }
        None
    }

    /// Uploaded file by name
    pub fn file(&self, name: &str) -> Option<&FileUpload> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Resolve the session id: `X-Session-ID` header, `session_id`
    /// cookie, `session_id` query parameter, then any id already on
    /// the request. The resolved id is written back so upstream
    /// callers see what the engine used.
    pub fn infer_session_id(&mut self) -> Option<String> {
        let inferred = self
            .header(SESSION_HEADER)
            .map(|s| s.to_string())
            .or_else(|| self.cookie(SESSION_KEY))
            .or_else(|| self.query.get(SESSION_KEY).cloned())
            .or_else(|| self.session_id.clone());
        self.session_id = inferred.clone();
        inferred
    }
}
