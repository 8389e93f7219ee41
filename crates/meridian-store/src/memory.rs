use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{StorageBackend, StoreError, StoredEntry};

/// In-memory backend.
///
/// Used as an ephemeral store in tests and as a fallback when no durable
/// directory is available. Honors the same lazy-expiry semantics as the
/// file backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, key: &str) -> Option<StoredEntry> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    fn store(&self, key: &str, entry: StoredEntry) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_string(), entry);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set(&self, key: &str, value: &Value, expire: Option<u64>) -> Result<(), StoreError> {
        self.store(key, StoredEntry::new(value.clone(), expire));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load(key).map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().unwrap();
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.load(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().unwrap();
        let prefix = pattern.trim_end_matches('*');
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| pattern == "*" || k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let current = self.load(key);
        let count = current
            .as_ref()
            .and_then(|e| e.value.as_i64())
            .unwrap_or(0)
            + amount;

        // Keep the original deadline so a counter's TTL survives increments.
        let mut entry = StoredEntry::new(Value::from(count), None);
        entry.expires_at = current.and_then(|e| e.expires_at);
        self.store(key, entry);
        Ok(count)
    }

    async fn set_hash(&self, key: &str, field: &str, value: &Value) -> Result<(), StoreError> {
        let current = self.load(key);
        let mut map = match current.as_ref().map(|e| &e.value) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        map.insert(field.to_string(), value.clone());

        let mut entry = StoredEntry::new(Value::Object(map), None);
        entry.expires_at = current.and_then(|e| e.expires_at);
        self.store(key, entry);
        Ok(())
    }

    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .load(key)
            .and_then(|e| e.value.get(field).cloned()))
    }

    async fn get_all_hash(&self, key: &str) -> Result<Map<String, Value>, StoreError> {
        match self.load(key).map(|e| e.value) {
            Some(Value::Object(map)) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}
