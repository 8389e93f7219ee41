use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use meridian_core::{Collaborator, CoreError};

use crate::clients::extract_id;
use crate::ports::{CaptureReceipt, ClientError, OrderReceipt, PaymentClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Payment events this client knows how to act on.
const HANDLED_EVENTS: [&str; 4] = [
    "CHECKOUT.ORDER.APPROVED",
    "PAYMENT.CAPTURE.COMPLETED",
    "PAYMENT.CAPTURE.DENIED",
    "PAYMENT.CAPTURE.REFUNDED",
];

/// Reference payment client for a REST order/capture provider.
pub struct RestPaymentClient {
    base_url: String,
    client_id: String,
    secret: String,
    http: reqwest::Client,
}

impl RestPaymentClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            secret: secret.into(),
            http,
        })
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.client_id, Some(&self.secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected(format!(
                "payment provider returned {status}"
            )));
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl PaymentClient for RestPaymentClient {
    async fn create_order(
        &self,
        amount: f64,
        currency: &str,
        description: &str,
    ) -> Result<OrderReceipt, ClientError> {
        let body = self
            .post_json(
                "/orders",
                json!({
                    "amount": amount,
                    "currency": currency,
                    "description": description,
                }),
            )
            .await?;

        let order_id = extract_id(Some(&body), &["order_id", "id"]);
        let approval_url = body
            .get("approval_url")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(%order_id, amount, currency, "order created");
        Ok(OrderReceipt {
            order_id,
            approval_url,
        })
    }

    async fn capture(&self, order_id: &str) -> Result<CaptureReceipt, ClientError> {
        let body = self
            .post_json(&format!("/orders/{order_id}/capture"), json!({}))
            .await?;
        let payment_id = extract_id(Some(&body), &["payment_id", "id"]);
        info!(order_id, %payment_id, "order captured");
        Ok(CaptureReceipt { payment_id })
    }

    async fn handle_webhook(&self, payload: &Map<String, Value>) -> Result<bool, ClientError> {
        let Some(event) = payload.get("event_type").and_then(Value::as_str) else {
            warn!("webhook without event_type, ignoring");
            return Ok(false);
        };

        if HANDLED_EVENTS.contains(&event) {
            info!(event, "payment webhook processed");
            Ok(true)
        } else {
            warn!(event, "unhandled payment webhook event");
            Ok(false)
        }
    }

    async fn probe(&self) -> Result<(), ClientError> {
        self.http
            .get(format!("{}/orders", self.base_url))
            .basic_auth(&self.client_id, Some(&self.secret))
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Collaborator for RestPaymentClient {
    fn name(&self) -> &str {
        "payments"
    }

    async fn probe(&self) -> Result<(), CoreError> {
        PaymentClient::probe(self)
            .await
            .map_err(|e| CoreError::Probe(e.to_string()))
    }

    async fn close(&self) {}
}
