use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};
use meridian_sanitize::sanitize_text;

use crate::tasks::{POSTED_HISTORY_CAP, TaskContext};

/// Posts within this window of the most recent history count as duplicates.
const DUPLICATE_LOOKBACK: usize = 10;

/// Delay between platforms within one posting cycle.
const PLATFORM_STAGGER: Duration = Duration::from_secs(30);

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "social_posting",
        Duration::from_secs(3_600),
        Duration::from_secs(300),
    )
}

pub fn cycle(ctx: Arc<TaskContext>) -> CycleFn {
    cycle_fn(move |cancel| {
        let ctx = ctx.clone();
        async move { run_cycle(&ctx, &cancel).await }
    })
}

/// Generate and publish one piece of content per platform, spacing the
/// platforms out and respecting every rate-limit window.
async fn run_cycle(ctx: &TaskContext, cancel: &CancellationToken) -> Result<(), TaskError> {
    for (i, social) in ctx.socials.iter().enumerate() {
        if i > 0 {
            tokio::select! {
                _ = tokio::time::sleep(PLATFORM_STAGGER) => {}
                _ = cancel.cancelled() => return Err(TaskError::Canceled),
            }
        }
        if cancel.is_cancelled() {
            return Err(TaskError::Canceled);
        }

        let platform = social.platform();
        let report = ctx.limiter.is_allowed(platform, "post").await;
        if !report.allowed {
            info!(platform, blocked_by = ?report.blocked_by, "skipping post, rate limit reached");
            continue;
        }

        let topic = next_topic(ctx).await;
        let max_length = ctx.post_limit(platform);
        let prompt =
            format!("Write a short, engaging social media update about {topic}. Plain text only.");

        let raw = match ctx.generator.generate(&prompt, max_length).await {
            Ok(text) => text,
            Err(e) => {
                warn!(platform, error = %e, "content generation failed");
                continue;
            }
        };

        let content = sanitize_text(&raw, Some(max_length));
        if content.is_empty() {
            warn!(platform, "generated content discarded by sanitization");
            continue;
        }
        if is_recent_duplicate(ctx, platform, &content).await {
            info!(platform, "skipping duplicate content");
            continue;
        }

        match ctx
            .limiter
            .execute(platform, "post", || social.post(&content))
            .await
        {
            Ok(receipt) => {
                record_posted(ctx, platform, &content, &receipt.id).await;
                info!(platform, id = %receipt.id, "content posted");
            }
            Err(e) if e.is_denied() => {
                info!(platform, "post denied by rate limiter");
            }
            Err(e) => {
                // One platform failing must not stop the others.
                warn!(platform, error = %e, "posting failed");
                ctx.registry.record_error(format!("{platform} post: {e}"));
            }
        }
    }
    Ok(())
}

/// Round-robin over the configured topics, with the cursor in the store so
/// rotation survives restarts.
async fn next_topic(ctx: &TaskContext) -> String {
    if ctx.topics.is_empty() {
        return "industry news".to_string();
    }
    let n = ctx.store.increment("content:topic_cursor", 1).await.max(1) as usize;
    ctx.topics[(n - 1) % ctx.topics.len()].clone()
}

async fn is_recent_duplicate(ctx: &TaskContext, platform: &str, content: &str) -> bool {
    let key = format!("{platform}:posted_content");
    match ctx.store.get(&key).await {
        Some(Value::Array(items)) => items
            .iter()
            .rev()
            .take(DUPLICATE_LOOKBACK)
            .any(|item| item.get("content").and_then(Value::as_str) == Some(content)),
        _ => false,
    }
}

async fn record_posted(ctx: &TaskContext, platform: &str, content: &str, id: &str) {
    let key = format!("{platform}:posted_content");
    let record = json!({
        "id": id,
        "content": content,
        "posted_at": OffsetDateTime::now_utc().unix_timestamp(),
    });
    ctx.store.append_recent(&key, record, POSTED_HISTORY_CAP).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::ports::SocialClient;
    use crate::tasks::testutil::{FakeGenerator, FakePayments, FakeSocial, context_with};
    use meridian_core::ModuleRegistry;
    use meridian_limiter::RateLimiter;
    use meridian_model::Period;
    use meridian_store::{FailoverStore, FileBackend};

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test(start_paused = true)]
    async fn posts_to_every_platform_and_records_history() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let discord = Arc::new(FakeSocial::new("discord"));
        let ctx = context_with(vec![twitter.clone(), discord.clone()], "fresh insight");

        run_cycle(&ctx, &cancel()).await.unwrap();

        assert_eq!(twitter.posts.lock().unwrap().len(), 1);
        assert_eq!(discord.posts.lock().unwrap().len(), 1);

        let history = ctx.store.get("twitter:posted_content").await.unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["content"], "fresh insight");

        // Quota consumed in every configured window.
        let stats = ctx.limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 1);
        assert_eq!(stats[&Period::Daily].current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sanitizes_generated_content_before_posting() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let ctx = context_with(
            vec![twitter.clone()],
            "tip of the day <script>alert('x')</script>",
        );

        run_cycle(&ctx, &cancel()).await.unwrap();

        let posts = twitter.posts.lock().unwrap();
        assert_eq!(posts[0], "tip of the day");
    }

    #[tokio::test(start_paused = true)]
    async fn discards_content_that_sanitizes_to_empty() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let ctx = context_with(vec![twitter.clone()], "<script>only evil</script>");

        run_cycle(&ctx, &cancel()).await.unwrap();

        assert!(twitter.posts.lock().unwrap().is_empty());
        let stats = ctx.limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_platform_at_rate_limit() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let ctx = context_with(vec![twitter.clone()], "more content");
        for _ in 0..5 {
            ctx.limiter
                .increment_usage("twitter", "post", Period::Hourly, 1)
                .await;
        }

        run_cycle(&ctx, &cancel()).await.unwrap();
        assert!(twitter.posts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cycles_skip_duplicate_content() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let ctx = context_with(vec![twitter.clone()], "identical update");

        run_cycle(&ctx, &cancel()).await.unwrap();
        run_cycle(&ctx, &cancel()).await.unwrap();

        assert_eq!(twitter.posts.lock().unwrap().len(), 1);
        let stats = ctx.limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_post_consumes_no_quota() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        twitter.fail_posts.store(true, std::sync::atomic::Ordering::SeqCst);
        let ctx = context_with(vec![twitter.clone()], "will not post");

        run_cycle(&ctx, &cancel()).await.unwrap();

        let stats = ctx.limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 0);
        assert_eq!(ctx.registry.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_platforms_stops_the_cycle() {
        let a = Arc::new(FakeSocial::new("twitter"));
        let b = Arc::new(FakeSocial::new("discord"));
        let ctx = context_with(vec![a.clone(), b.clone()], "content");

        let token = cancel();
        let runner = {
            let ctx = ctx.clone();
            let token = token.clone();
            tokio::spawn(async move { run_cycle(&ctx, &token).await })
        };

        // Let the first platform publish, then cancel during the 30s stagger
        // before the second one is reached.
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let out = runner.await.unwrap();
        assert!(matches!(out, Err(TaskError::Canceled)));
        assert_eq!(a.posts.lock().unwrap().len(), 1);
        assert!(b.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn posted_history_survives_a_store_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx_over = |twitter: Arc<FakeSocial>| {
            let store = Arc::new(FailoverStore::new(
                None,
                Arc::new(FileBackend::new(dir.path()).unwrap()),
            ));
            Arc::new(TaskContext {
                limiter: Arc::new(RateLimiter::new(store.clone())),
                store,
                registry: ModuleRegistry::new(),
                socials: vec![twitter as Arc<dyn SocialClient>],
                generator: Arc::new(FakeGenerator {
                    response: "identical update".to_string(),
                }),
                payments: Arc::new(FakePayments::new()),
                post_limits: HashMap::from([("twitter".to_string(), 280)]),
                topics: vec!["ai".to_string()],
            })
        };

        let first = Arc::new(FakeSocial::new("twitter"));
        run_cycle(&ctx_over(first.clone()), &cancel()).await.unwrap();
        assert_eq!(first.posts.lock().unwrap().len(), 1);

        // A fresh store over the same data directory still sees the history,
        // so the duplicate guard holds across restarts.
        let second = Arc::new(FakeSocial::new("twitter"));
        run_cycle(&ctx_over(second.clone()), &cancel()).await.unwrap();
        assert!(second.posts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn topics_rotate_between_cycles() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        let ctx = context_with(vec![twitter], "x");

        assert_eq!(next_topic(&ctx).await, "ai");
        assert_eq!(next_topic(&ctx).await, "automation");
        assert_eq!(next_topic(&ctx).await, "ai");
    }
}
