use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{StorageBackend, StoreError, StoredEntry};

/// Durable local backend: one `<key>.json` file per key under a data
/// directory, each holding a [`StoredEntry`] document.
///
/// Writes go through a temp file + rename so a crash mid-write leaves the
/// previous document intact. Read-modify-write operations (increment, hash
/// updates) are serialized by an in-process mutex; the data directory is
/// assumed to be owned by a single process.
pub struct FileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (and create if needed) the data directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }

    /// Read the raw entry for a key, enforcing lazy expiry.
    async fn load_entry(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let path = self.path_for(key)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = serde_json::from_slice(&content)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if entry.is_expired(now) {
            debug!(key, "entry expired, removing");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn write_entry(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!("{key}.json.tmp"));
        fs::write(&tmp, serde_json::to_vec(entry)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        fs::metadata(&self.root).await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &Value, expire: Option<u64>) -> Result<(), StoreError> {
        self.write_entry(key, &StoredEntry::new(value.clone(), expire))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load_entry(key).await?.map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.load_entry(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let prefix = pattern.trim_end_matches('*');
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = name.strip_suffix(".json") else {
                continue;
            };
            if pattern == "*" || key.starts_with(prefix) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self.load_entry(key).await?;
        let count = current
            .as_ref()
            .and_then(|e| e.value.as_i64())
            .unwrap_or(0)
            + amount;

        let mut entry = StoredEntry::new(Value::from(count), None);
        entry.expires_at = current.and_then(|e| e.expires_at);
        self.write_entry(key, &entry).await?;
        Ok(count)
    }

    async fn set_hash(&self, key: &str, field: &str, value: &Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self.load_entry(key).await?;
        let mut map = match current.as_ref().map(|e| &e.value) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        map.insert(field.to_string(), value.clone());

        let mut entry = StoredEntry::new(Value::Object(map), None);
        entry.expires_at = current.and_then(|e| e.expires_at);
        self.write_entry(key, &entry).await
    }

    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .load_entry(key)
            .await?
            .and_then(|e| e.value.get(field).cloned()))
    }

    async fn get_all_hash(&self, key: &str) -> Result<Map<String, Value>, StoreError> {
        match self.load_entry(key).await?.map(|e| e.value) {
            Some(Value::Object(map)) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}
