use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::StoreError;

/// Capability set every storage backend provides.
///
/// The failover layer composes two of these; nothing above it should care
/// whether a key lives in the networked cache or in a local file.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Cheap liveness check; used by the failover layer to (re)connect.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Store a value, optionally expiring after `expire` seconds.
    async fn set(&self, key: &str, value: &Value, expire: Option<u64>) -> Result<(), StoreError>;

    /// Fetch a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Remove a key. Returns `true` when a key was actually removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// List keys matching `pattern`: `"*"` matches everything, a trailing
    /// `*` matches by prefix.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Add `amount` to an integer value, creating it at zero first.
    /// Returns the new count.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    /// Set one field of a hash entry.
    async fn set_hash(&self, key: &str, field: &str, value: &Value) -> Result<(), StoreError>;

    /// Fetch one field of a hash entry.
    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch a whole hash entry; missing keys read as an empty map.
    async fn get_all_hash(&self, key: &str) -> Result<Map<String, Value>, StoreError>;
}
