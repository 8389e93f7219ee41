use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};

use crate::tasks::TaskContext;

pub const INSIGHTS_KEY: &str = "learning:insights";

/// How many top posting hours to surface as a recommendation.
const TOP_HOURS: usize = 3;

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "learning_cycle",
        Duration::from_secs(604_800),
        Duration::from_secs(86_400),
    )
}

pub fn cycle(ctx: Arc<TaskContext>) -> CycleFn {
    cycle_fn(move |cancel| {
        let ctx = ctx.clone();
        async move { run_cycle(&ctx, &cancel).await }
    })
}

/// Mine the posted-content history for simple timing and length patterns and
/// persist them as the current set of insights.
async fn run_cycle(ctx: &TaskContext, cancel: &CancellationToken) -> Result<(), TaskError> {
    if cancel.is_cancelled() {
        return Err(TaskError::Canceled);
    }

    let mut hour_counts = [0u32; 24];
    let mut lengths = Vec::new();

    for social in &ctx.socials {
        let key = format!("{}:posted_content", social.platform());
        let Some(Value::Array(posts)) = ctx.store.get(&key).await else {
            continue;
        };
        for post in posts {
            if let Some(ts) = post.get("posted_at").and_then(Value::as_i64)
                && let Ok(at) = OffsetDateTime::from_unix_timestamp(ts)
            {
                hour_counts[at.hour() as usize] += 1;
            }
            if let Some(content) = post.get("content").and_then(Value::as_str) {
                lengths.push(content.chars().count());
            }
        }
    }

    let posts_analyzed = lengths.len();
    let average_length = if posts_analyzed > 0 {
        lengths.iter().sum::<usize>() as f64 / posts_analyzed as f64
    } else {
        0.0
    };

    let mut hours: Vec<(usize, u32)> = hour_counts
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let best_hours: Vec<usize> = hours.iter().take(TOP_HOURS).map(|(h, _)| *h).collect();

    let insights = json!({
        "generated_at": OffsetDateTime::now_utc().unix_timestamp(),
        "posts_analyzed": posts_analyzed,
        "average_content_length": average_length,
        "best_posting_hours": best_hours,
    });
    ctx.store.set(INSIGHTS_KEY, &insights, None).await;

    info!(posts_analyzed, "learning cycle completed");
    Ok(())
}
