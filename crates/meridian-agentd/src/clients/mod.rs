mod generator;
pub use generator::HttpTextGenerator;

mod payment;
pub use payment::RestPaymentClient;

mod social;
pub use social::WebhookSocialClient;

use serde_json::Value;

/// Pull an identifier out of a response body, trying each key in order.
/// Falls back to a generated id so a successful publish is never dropped
/// just because the platform answered with an unexpected shape.
fn extract_id(body: Option<&Value>, keys: &[&str]) -> String {
    if let Some(body) = body {
        for key in keys {
            match body.get(key) {
                Some(Value::String(id)) if !id.is_empty() => return id.clone(),
                Some(Value::Number(id)) => return id.to_string(),
                _ => {}
            }
        }
    }
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_id_prefers_earlier_keys() {
        let body = json!({"id": "abc", "order_id": "def"});
        assert_eq!(extract_id(Some(&body), &["order_id", "id"]), "def");
    }

    #[test]
    fn extract_id_accepts_numbers() {
        let body = json!({"id": 42});
        assert_eq!(extract_id(Some(&body), &["id"]), "42");
    }

    #[test]
    fn extract_id_generates_when_absent() {
        let a = extract_id(None, &["id"]);
        let b = extract_id(Some(&json!({"other": 1})), &["id"]);
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
