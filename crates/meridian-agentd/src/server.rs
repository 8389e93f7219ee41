use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{info, warn};

use meridian_core::ModuleRegistry;
use meridian_model::HealthSnapshot;
use meridian_sanitize::{sanitize_text, sanitize_webhook};
use meridian_store::FailoverStore;

use crate::ports::{OrderReceipt, PaymentClient};
use crate::tasks::sales::{PAYMENTS_KEY, PENDING_CAPTURES_KEY};

/// Hash of created orders, keyed by order id.
const ORDERS_KEY: &str = "sales:orders";

/// Hash of refunds, keyed by refund id.
const REFUNDS_KEY: &str = "sales:refunds";

/// Audit trail of sanitized inbound webhooks.
const WEBHOOK_LOG_KEY: &str = "sales:webhooks";
const WEBHOOK_LOG_CAP: usize = 100;

pub struct ApiState {
    pub registry: ModuleRegistry,
    pub payments: Arc<dyn PaymentClient>,
    pub store: Arc<FailoverStore>,
}

/// Build the inbound HTTP surface.
///
/// Routes:
/// - GET /healthz - current health snapshot
/// - POST /orders - create a payment order
/// - POST /webhooks/payment - payment provider notifications
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/orders", post(create_order))
        .route("/webhooks/payment", post(payment_webhook))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    processed: bool,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    amount: f64,
    #[serde(default = "default_currency")]
    currency: String,
    description: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

enum ApiError {
    InvalidRequest(String),
    Payment(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Payment(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
        }
    }
}

async fn healthz(State(state): State<Arc<ApiState>>) -> Json<HealthSnapshot> {
    Json(state.registry.health_snapshot())
}

/// Create an order with the payment provider and record it.
async fn create_order(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<OrderReceipt>, ApiError> {
    if req.amount <= 0.0 {
        return Err(ApiError::InvalidRequest("amount must be positive".to_string()));
    }
    let description = sanitize_text(&req.description, Some(500));
    if description.is_empty() {
        return Err(ApiError::InvalidRequest("description is empty".to_string()));
    }

    let receipt = state
        .payments
        .create_order(req.amount, &req.currency, &description)
        .await
        .map_err(|e| ApiError::Payment(e.to_string()))?;

    let record = json!({
        "amount": req.amount,
        "currency": req.currency,
        "description": description,
        "status": "created",
        "created_at": OffsetDateTime::now_utc().unix_timestamp(),
    });
    state
        .store
        .set_hash(ORDERS_KEY, &receipt.order_id, &record)
        .await;

    info!(order_id = %receipt.order_id, amount = req.amount, "order created");
    Ok(Json(receipt))
}

/// Sanitize, audit, and dispatch one payment webhook. Approved orders are
/// queued for the sales loop to capture.
async fn payment_webhook(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<Value>,
) -> Json<WebhookResponse> {
    let sanitized = sanitize_webhook(&payload);
    if sanitized.is_empty() {
        warn!("discarding empty or malformed payment webhook");
        return Json(WebhookResponse { processed: false });
    }

    state
        .store
        .append_recent(
            WEBHOOK_LOG_KEY,
            Value::Object(sanitized.clone()),
            WEBHOOK_LOG_CAP,
        )
        .await;

    match sanitized.get("event_type").and_then(Value::as_str) {
        Some("CHECKOUT.ORDER.APPROVED") => {
            if let Some(order_id) = resource_id(&sanitized) {
                info!(%order_id, "order approved, queued for capture");
                state
                    .store
                    .append_recent(PENDING_CAPTURES_KEY, Value::String(order_id), 1_000)
                    .await;
            }
        }
        Some("PAYMENT.CAPTURE.DENIED") => {
            if let Some(capture_id) = resource_id(&sanitized) {
                warn!(%capture_id, "payment denied");
                let record = json!({
                    "status": "denied",
                    "recorded_at": OffsetDateTime::now_utc().unix_timestamp(),
                });
                state.store.set_hash(PAYMENTS_KEY, &capture_id, &record).await;
            }
        }
        Some("PAYMENT.CAPTURE.REFUNDED") => {
            if let Some(refund_id) = resource_id(&sanitized) {
                info!(%refund_id, "refund recorded");
                let record = json!({
                    "status": "completed",
                    "amount": sanitized.get("resource").and_then(|r| r.get("amount")),
                    "recorded_at": OffsetDateTime::now_utc().unix_timestamp(),
                });
                state.store.set_hash(REFUNDS_KEY, &refund_id, &record).await;
            }
        }
        _ => {}
    }

    let processed = match state.payments.handle_webhook(&sanitized).await {
        Ok(processed) => processed,
        Err(e) => {
            warn!(error = %e, "payment webhook handling failed");
            false
        }
    };
    Json(WebhookResponse { processed })
}

/// Id of the resource a webhook refers to: the nested `resource.id` in
/// provider notifications, or a top-level `order_id` from simpler bridges.
fn resource_id(payload: &serde_json::Map<String, Value>) -> Option<String> {
    payload
        .get("resource")
        .and_then(|r| r.get("id"))
        .or_else(|| payload.get("order_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
