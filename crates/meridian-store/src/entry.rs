use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// On-disk document for one key: the value plus its lifecycle timestamps.
///
/// Expiry is lazy: nothing sweeps expired entries, they are checked (and
/// removed) when read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: Value,
    /// Unix seconds at which the entry was written.
    pub created_at: i64,
    /// Unix seconds after which the entry reads as absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StoredEntry {
    pub fn new(value: Value, expire_secs: Option<u64>) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            value,
            created_at: now,
            expires_at: expire_secs.map(|s| now + s as i64),
        }
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        matches!(self.expires_at, Some(at) if now_unix > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_without_expiry_never_expires() {
        let entry = StoredEntry::new(json!({"a": 1}), None);
        assert!(!entry.is_expired(i64::MAX));
    }

    #[test]
    fn entry_expires_after_deadline() {
        let entry = StoredEntry::new(json!(42), Some(10));
        let deadline = entry.expires_at.unwrap();
        assert!(!entry.is_expired(deadline));
        assert!(entry.is_expired(deadline + 1));
    }

    #[test]
    fn serde_omits_missing_expiry() {
        let entry = StoredEntry::new(json!("v"), None);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("created_at"));
        assert!(!json.contains("expires_at"));
    }
}
