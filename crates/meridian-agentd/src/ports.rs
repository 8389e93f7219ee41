use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure surface shared by all collaborator clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Request(e.to_string())
    }
}

/// Identifier returned by a platform for published content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReceipt {
    pub id: String,
}

/// One inbound mention/notification pulled from a platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundItem {
    pub id: String,
    pub author: String,
    pub text: String,
}

/// Order created with the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
}

/// Completed capture of an approved order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub payment_id: String,
}

/// Outbound social platform. Implementations are thin request/response
/// wrappers; everything they publish has already been sanitized and
/// rate-limit-checked by the caller.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Lowercase platform name; doubles as the rate-limiter key.
    fn platform(&self) -> &str;

    async fn post(&self, content: &str) -> Result<PostReceipt, ClientError>;

    /// Fetch items that arrived after the `since` cursor (platform-defined).
    async fn fetch_new_items(&self, since: Option<&str>) -> Result<Vec<InboundItem>, ClientError>;

    async fn reply(&self, item_id: &str, content: &str) -> Result<PostReceipt, ClientError>;

    async fn probe(&self) -> Result<(), ClientError>;

    async fn close(&self) {}
}

/// Payment provider. Webhook payloads reach `handle_webhook` already
/// sanitized; the caller persists the resulting records.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn create_order(
        &self,
        amount: f64,
        currency: &str,
        description: &str,
    ) -> Result<OrderReceipt, ClientError>;

    async fn capture(&self, order_id: &str) -> Result<CaptureReceipt, ClientError>;

    /// Interpret a sanitized webhook payload. Returns `true` when the event
    /// was recognized and processed.
    async fn handle_webhook(&self, payload: &Map<String, Value>) -> Result<bool, ClientError>;

    async fn probe(&self) -> Result<(), ClientError>;

    async fn close(&self) {}
}

/// AI text generation service. Callers never send unsanitized user input in
/// and always sanitize the output before storing or publishing it.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, ClientError>;

    async fn probe(&self) -> Result<(), ClientError>;

    async fn close(&self) {}
}
