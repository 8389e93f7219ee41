use serde_json::{Map, Value};
use tracing::warn;

use crate::sanitize_text;

const MAX_KEY_LENGTH: usize = 100;
const MAX_STRING_LENGTH: usize = 10_000;

/// Recursively sanitize every string inside a structured payload.
///
/// Map keys are cleaned and capped as well; numbers, booleans and nulls pass
/// through untouched.
pub fn sanitize_structured(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(s, Some(MAX_STRING_LENGTH))),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_structured).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let clean_key = sanitize_text(key, Some(MAX_KEY_LENGTH));
                if clean_key.is_empty() {
                    warn!("dropping field with unsanitizable key");
                    continue;
                }
                out.insert(clean_key, sanitize_structured(item));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Sanitize an inbound webhook payload.
///
/// Webhooks come from outside the trust boundary, so a non-object payload is
/// rejected outright rather than coerced.
pub fn sanitize_webhook(payload: &Value) -> Map<String, Value> {
    match sanitize_structured(payload) {
        Value::Object(map) => map,
        _ => {
            warn!("webhook payload is not an object, discarding");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cleans_nested_strings() {
        let payload = json!({
            "title": "hi <script>x</script>there",
            "nested": {"note": "a & b"},
            "items": ["<style>p{}</style>ok", 7, true, null]
        });

        let out = sanitize_structured(&payload);
        assert_eq!(out["title"], "hi there");
        assert_eq!(out["nested"]["note"], "a &amp; b");
        assert_eq!(out["items"][0], "ok");
        assert_eq!(out["items"][1], 7);
        assert_eq!(out["items"][2], true);
        assert_eq!(out["items"][3], Value::Null);
    }

    #[test]
    fn sanitizes_keys() {
        let payload = json!({"<script>k</script>amount": 10});
        let out = sanitize_structured(&payload);
        assert_eq!(out["amount"], 10);
    }

    #[test]
    fn drops_fields_whose_key_vanishes() {
        let payload = json!({"<script>x</script>": 1, "ok": 2});
        let out = sanitize_structured(&payload);
        let map = out.as_object().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["ok"], 2);
    }

    #[test]
    fn webhook_accepts_objects_only() {
        let map = sanitize_webhook(&json!({"event": "PAYMENT.COMPLETED"}));
        assert_eq!(map["event"], "PAYMENT.COMPLETED");

        assert!(sanitize_webhook(&json!("raw string")).is_empty());
        assert!(sanitize_webhook(&json!([1, 2])).is_empty());
    }
}
