//! Key-value storage containers
//!
//! Two stores back the expression-visible `set`/`get` scopes: a
//! session store tied to a session id that may outlive one request,
//! and a process-wide memory store. Both are concurrent maps behind a
//! narrow get/set/delete/keys/snapshot surface so resource authors
//! never see locking.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Concurrent KV store shared across requests
#[derive(Debug, Default)]
pub struct KvStore {
    map: DashMap<String, Value>,
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a value by key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.get(key).map(|v| v.value().clone())
    }

    /// Store a value under a key
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    /// Remove a key, returning its previous value
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.map.remove(key).map(|(_, v)| v)
    }

    /// All stored keys
    pub fn keys(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    /// Copy of the full store as a JSON object; empty stores snapshot
    /// to an empty map
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Registry of session stores keyed by session id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<KvStore>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for the given session id, created on first use
    pub fn session(&self, session_id: &str) -> Arc<KvStore> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(KvStore::new()))
            .clone()
    }

    /// Drop a session and its data
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kv_round_trip() {
        let store = KvStore::new();
        store.set("greeting", json!("hello"));
        assert_eq!(store.get("greeting"), Some(json!("hello")));
        assert_eq!(store.delete("greeting"), Some(json!("hello")));
        assert_eq!(store.get("greeting"), None);
    }

    #[test]
    fn empty_store_snapshots_to_empty_map() {
        let store = KvStore::new();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn sessions_are_isolated_by_id() {
        let registry = SessionRegistry::new();
        registry.session("a").set("k", json!(1));
        assert_eq!(registry.session("b").get("k"), None);
        assert_eq!(registry.session("a").get("k"), Some(json!(1)));
    }

    #[test]
    fn session_store_is_shared_across_fetches() {
        let registry = SessionRegistry::new();
        let first = registry.session("s1");
        first.set("count", json!(2));
        let second = registry.session("s1");
        assert_eq!(second.get("count"), Some(json!(2)));
    }
}
