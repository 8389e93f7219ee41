use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::{StorageBackend, StoreError};

const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Which backend currently serves operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Primary reachable; operations target it, falling back per call on error.
    Connected,
    /// Primary given up on (or never configured); everything goes local.
    Fallback,
}

/// Failover-aware store: a primary networked backend with a local durable
/// backend behind it.
///
/// While connected, any single failing call is retried against the fallback
/// without demoting the whole store; only an exhausted `connect()` moves the
/// store into fallback mode, where it stays until an explicit [`reconnect`].
///
/// Every operation fails gracefully: callers see sentinel values
/// (`false`/`None`/`0`/empty), never an error.
///
/// [`reconnect`]: FailoverStore::reconnect
pub struct FailoverStore {
    primary: Option<Arc<dyn StorageBackend>>,
    fallback: Arc<dyn StorageBackend>,
    mode: RwLock<StoreMode>,
    max_connection_attempts: u32,
}

impl FailoverStore {
    pub fn new(primary: Option<Arc<dyn StorageBackend>>, fallback: Arc<dyn StorageBackend>) -> Self {
        Self {
            primary,
            fallback,
            mode: RwLock::new(StoreMode::Fallback),
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
        }
    }

    pub fn with_max_connection_attempts(mut self, attempts: u32) -> Self {
        self.max_connection_attempts = attempts.max(1);
        self
    }

    pub fn mode(&self) -> StoreMode {
        *self.mode.read().unwrap()
    }

    fn set_mode(&self, mode: StoreMode) {
        *self.mode.write().unwrap() = mode;
    }

    /// Try to reach the primary, with `2^attempt`-second backoff between
    /// attempts. Returns `true` when the store ends up connected; `false`
    /// means it is serving from the local backend. Never fails.
    pub async fn connect(&self) -> bool {
        let Some(primary) = &self.primary else {
            warn!("no primary store configured, using local storage");
            self.set_mode(StoreMode::Fallback);
            return false;
        };

        for attempt in 1..=self.max_connection_attempts {
            match primary.ping().await {
                Ok(()) => {
                    info!("primary store connection established");
                    self.set_mode(StoreMode::Connected);
                    return true;
                }
                Err(e) => {
                    error!(
                        attempt,
                        max = self.max_connection_attempts,
                        error = %e,
                        "primary store connection failed"
                    );
                    if attempt < self.max_connection_attempts {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        warn!("max connection attempts reached, falling back to local storage");
        self.set_mode(StoreMode::Fallback);
        false
    }

    /// Explicitly retry the primary after a demotion.
    pub async fn reconnect(&self) -> bool {
        self.connect().await
    }

    /// Run `op` against the primary when connected, falling back to the
    /// local backend for this call only on error.
    async fn run<'s, T, F>(&'s self, what: &str, key: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn(
            &'s Arc<dyn StorageBackend>,
        )
            -> Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 's>>,
    {
        if self.mode() == StoreMode::Connected
            && let Some(primary) = &self.primary
        {
            match op(primary).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    warn!(key, error = %e, "primary {what} failed, retrying against local storage");
                }
            }
        }
        op(&self.fallback).await
    }

    pub async fn set(&self, key: &str, value: &Value, expire: Option<u64>) -> bool {
        match self.run("set", key, |b| Box::pin(async move { b.set(key, value, expire).await })).await {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "set failed");
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.run("get", key, |b| Box::pin(async move { b.get(key).await })).await {
            Ok(value) => value,
            Err(e) => {
                error!(key, error = %e, "get failed");
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.run("delete", key, |b| Box::pin(async move { b.delete(key).await })).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(key, error = %e, "delete failed");
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.run("exists", key, |b| Box::pin(async move { b.exists(key).await })).await {
            Ok(found) => found,
            Err(e) => {
                error!(key, error = %e, "exists check failed");
                false
            }
        }
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        match self.run("keys", pattern, |b| Box::pin(async move { b.keys(pattern).await })).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(pattern, error = %e, "keys listing failed");
                Vec::new()
            }
        }
    }

    /// Returns the new count, or `0` when the increment could not be applied.
    pub async fn increment(&self, key: &str, amount: i64) -> i64 {
        match self
            .run("increment", key, |b| Box::pin(async move { b.increment(key, amount).await }))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!(key, error = %e, "increment failed");
                0
            }
        }
    }

    pub async fn set_hash(&self, key: &str, field: &str, value: &Value) -> bool {
        match self
            .run("hash set", key, |b| Box::pin(async move { b.set_hash(key, field, value).await }))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(key, field, error = %e, "hash set failed");
                false
            }
        }
    }

    pub async fn get_hash(&self, key: &str, field: &str) -> Option<Value> {
        match self
            .run("hash get", key, |b| Box::pin(async move { b.get_hash(key, field).await }))
            .await
        {
            Ok(value) => value,
            Err(e) => {
                error!(key, field, error = %e, "hash get failed");
                None
            }
        }
    }

    pub async fn get_all_hash(&self, key: &str) -> Map<String, Value> {
        match self
            .run("hash read", key, |b| Box::pin(async move { b.get_all_hash(key).await }))
            .await
        {
            Ok(map) => map,
            Err(e) => {
                error!(key, error = %e, "hash read failed");
                Map::new()
            }
        }
    }

    /// Append to a list-valued entry, trimming to the most recent `cap`
    /// items. The entry self-trims so unbounded histories cannot accrete.
    pub async fn append_recent(&self, key: &str, value: Value, cap: usize) -> bool {
        let mut items = match self.get(key).await {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        items.push(value);
        if items.len() > cap {
            let excess = items.len() - cap;
            items.drain(..excess);
        }
        self.set(key, &Value::Array(items), None).await
    }
}
