use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};
use meridian_model::Period;

use crate::tasks::{TaskContext, sales};

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "analytics_generation",
        Duration::from_secs(86_400),
        Duration::from_secs(3_600),
    )
}

pub fn cycle(ctx: Arc<TaskContext>) -> CycleFn {
    cycle_fn(move |cancel| {
        let ctx = ctx.clone();
        async move { run_cycle(&ctx, &cancel, OffsetDateTime::now_utc()).await }
    })
}

/// Produce the daily report every cycle, plus the weekly report on Mondays
/// and the monthly report on the first of the month.
async fn run_cycle(
    ctx: &TaskContext,
    cancel: &CancellationToken,
    now: OffsetDateTime,
) -> Result<(), TaskError> {
    if cancel.is_cancelled() {
        return Err(TaskError::Canceled);
    }

    store_report(ctx, Period::Daily, now).await;

    if now.weekday() == time::Weekday::Monday {
        store_report(ctx, Period::Weekly, now).await;
    }
    if now.day() == 1 {
        store_report(ctx, Period::Monthly, now).await;
    }
    Ok(())
}

async fn store_report(ctx: &TaskContext, period: Period, now: OffsetDateTime) {
    let report = build_report(ctx, period, now).await;
    let key = format!("analytics:report:{period}:{}", period.bucket_key(now));
    ctx.store.set(&key, &report, None).await;
    info!(%period, %key, "analytics report generated");
}

/// Aggregate posting and payment activity into one report document.
async fn build_report(ctx: &TaskContext, period: Period, now: OffsetDateTime) -> Value {
    let window_secs = period.ttl_seconds() as i64;
    let cutoff = now.unix_timestamp() - window_secs;

    let mut per_platform = serde_json::Map::new();
    let mut total_posts = 0usize;
    let mut total_length = 0usize;

    for social in &ctx.socials {
        let platform = social.platform();
        let key = format!("{platform}:posted_content");
        let posts: Vec<Value> = match ctx.store.get(&key).await {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter(|p| {
                    p.get("posted_at").and_then(Value::as_i64).unwrap_or(0) >= cutoff
                })
                .collect(),
            _ => Vec::new(),
        };

        total_posts += posts.len();
        total_length += posts
            .iter()
            .filter_map(|p| p.get("content").and_then(Value::as_str))
            .map(str::len)
            .sum::<usize>();

        per_platform.insert(platform.to_string(), json!({ "posts": posts.len() }));
    }

    let payments = ctx.store.get_all_hash(sales::PAYMENTS_KEY).await;
    let completed = payments
        .values()
        .filter(|p| p.get("status").and_then(Value::as_str) == Some("completed"))
        .count();

    let average_length = if total_posts > 0 {
        total_length as f64 / total_posts as f64
    } else {
        0.0
    };

    json!({
        "period": period.as_str(),
        "generated_at": now.unix_timestamp(),
        "social": {
            "total_posts": total_posts,
            "average_content_length": average_length,
            "platforms": per_platform,
        },
        "sales": {
            "payments_recorded": payments.len(),
            "payments_completed": completed,
        },
        "health": ctx.registry.health_snapshot().overall_health,
    })
}
