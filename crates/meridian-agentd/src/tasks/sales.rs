use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};

use crate::tasks::TaskContext;

/// Queue of order ids awaiting capture, fed by approved-order webhooks.
pub const PENDING_CAPTURES_KEY: &str = "sales:pending_captures";

/// Hash of completed payments, keyed by payment id.
pub const PAYMENTS_KEY: &str = "sales:payments";

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "sales_processing",
        Duration::from_secs(300),
        Duration::from_secs(60),
    )
}

pub fn cycle(ctx: Arc<TaskContext>) -> CycleFn {
    cycle_fn(move |cancel| {
        let ctx = ctx.clone();
        async move { run_cycle(&ctx, &cancel).await }
    })
}

/// Drain the pending-capture queue: captured orders become payment records,
/// failed captures stay queued for the next cycle.
async fn run_cycle(ctx: &TaskContext, cancel: &CancellationToken) -> Result<(), TaskError> {
    let pending = match ctx.store.get(PENDING_CAPTURES_KEY).await {
        Some(Value::Array(items)) => items,
        _ => return Ok(()),
    };
    if pending.is_empty() {
        return Ok(());
    }
    info!(count = pending.len(), "processing pending captures");

    let mut remaining = Vec::new();
    for item in pending {
        if cancel.is_cancelled() {
            remaining.push(item);
            continue;
        }
        let Some(order_id) = item.as_str() else {
            warn!(?item, "dropping malformed pending capture entry");
            continue;
        };

        match ctx.payments.capture(order_id).await {
            Ok(receipt) => {
                let record = json!({
                    "order_id": order_id,
                    "status": "completed",
                    "captured_at": OffsetDateTime::now_utc().unix_timestamp(),
                });
                ctx.store
                    .set_hash(PAYMENTS_KEY, &receipt.payment_id, &record)
                    .await;
                info!(order_id, payment_id = %receipt.payment_id, "payment captured");
            }
            Err(e) => {
                warn!(order_id, error = %e, "capture failed, will retry");
                ctx.registry.record_error(format!("capture {order_id}: {e}"));
                remaining.push(item);
            }
        }
    }

    ctx.store
        .set(PENDING_CAPTURES_KEY, &Value::Array(remaining), None)
        .await;
    Ok(())
}
