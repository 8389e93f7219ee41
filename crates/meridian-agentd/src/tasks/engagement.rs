use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};
use meridian_sanitize::sanitize_text;

use crate::ports::{InboundItem, SocialClient};
use crate::tasks::TaskContext;

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "engagement_monitoring",
        Duration::from_secs(900),
        Duration::from_secs(300),
    )
}

pub fn cycle(ctx: Arc<TaskContext>) -> CycleFn {
    cycle_fn(move |cancel| {
        let ctx = ctx.clone();
        async move { run_cycle(&ctx, &cancel).await }
    })
}

/// Poll every platform for new mentions and dispatch sanitized auto-replies,
/// tracking a per-platform cursor and a processed-item ledger so nothing is
/// answered twice.
async fn run_cycle(ctx: &TaskContext, cancel: &CancellationToken) -> Result<(), TaskError> {
    for social in &ctx.socials {
        if cancel.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        let platform = social.platform();

        let cursor_key = format!("{platform}:engagement_cursor");
        let since = ctx
            .store
            .get(&cursor_key)
            .await
            .and_then(|v| v.as_str().map(str::to_string));

        let items = match social.fetch_new_items(since.as_deref()).await {
            Ok(items) => items,
            Err(e) => {
                // One platform failing must not stop the others.
                warn!(platform, error = %e, "fetching mentions failed");
                ctx.registry.record_error(format!("{platform} fetch: {e}"));
                continue;
            }
        };
        if items.is_empty() {
            continue;
        }
        info!(platform, count = items.len(), "mentions fetched");

        let processed_key = format!("{platform}:processed_mentions");
        let mut last_seen = since;
        for item in &items {
            if ctx.store.get_hash(&processed_key, &item.id).await.is_some() {
                last_seen = Some(item.id.clone());
                continue;
            }
            match handle_mention(ctx, social.as_ref(), item).await {
                MentionOutcome::Replied => {
                    let record = json!({
                        "author": item.author,
                        "replied_at": OffsetDateTime::now_utc().unix_timestamp(),
                    });
                    ctx.store.set_hash(&processed_key, &item.id, &record).await;
                    last_seen = Some(item.id.clone());
                }
                MentionOutcome::Discarded => {
                    let record = json!({ "author": item.author, "discarded": true });
                    ctx.store.set_hash(&processed_key, &item.id, &record).await;
                    last_seen = Some(item.id.clone());
                }
                // Stop here so the cursor does not move past items that are
                // still eligible for a retry next cycle.
                MentionOutcome::Retry => break,
            }
        }

        if let Some(cursor) = last_seen {
            ctx.store.set(&cursor_key, &json!(cursor), None).await;
        }
    }
    Ok(())
}

enum MentionOutcome {
    /// A reply was published; the item is done.
    Replied,
    /// The item is unusable and will never be answered.
    Discarded,
    /// A transient condition (quota, generation, publish failure); leave the
    /// item for the next cycle.
    Retry,
}

async fn handle_mention(
    ctx: &TaskContext,
    social: &dyn SocialClient,
    item: &InboundItem,
) -> MentionOutcome {
    let platform = social.platform();

    // The inbound text is untrusted; clean it before it goes anywhere near
    // the generation prompt.
    let inbound = sanitize_text(&item.text, Some(500));
    if inbound.is_empty() {
        warn!(platform, item = %item.id, "mention discarded by sanitization");
        return MentionOutcome::Discarded;
    }

    let report = ctx.limiter.is_allowed(platform, "reply").await;
    if !report.allowed {
        info!(platform, "skipping reply, rate limit reached");
        return MentionOutcome::Retry;
    }

    let max_length = ctx.post_limit(platform);
    let prompt = format!(
        "Write a brief, helpful reply to this message: \"{inbound}\". Plain text only."
    );
    let raw = match ctx.generator.generate(&prompt, max_length).await {
        Ok(text) => text,
        Err(e) => {
            warn!(platform, error = %e, "reply generation failed");
            return MentionOutcome::Retry;
        }
    };

    let reply = sanitize_text(&raw, Some(max_length));
    if reply.is_empty() {
        warn!(platform, "generated reply discarded by sanitization");
        return MentionOutcome::Retry;
    }

    match ctx
        .limiter
        .execute(platform, "reply", || social.reply(&item.id, &reply))
        .await
    {
        Ok(receipt) => {
            info!(platform, item = %item.id, reply_id = %receipt.id, "replied to mention");
            MentionOutcome::Replied
        }
        Err(e) if e.is_denied() => {
            info!(platform, "reply denied by rate limiter");
            MentionOutcome::Retry
        }
        Err(e) => {
            warn!(platform, item = %item.id, error = %e, "reply failed");
            ctx.registry.record_error(format!("{platform} reply: {e}"));
            MentionOutcome::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{FakeSocial, context_with};

    fn mention(id: &str, text: &str) -> InboundItem {
        InboundItem {
            id: id.to_string(),
            author: "someone".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn replies_to_new_mentions_and_marks_processed() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        twitter
            .inbox
            .lock()
            .unwrap()
            .extend([mention("m1", "love this"), mention("m2", "tell me more")]);
        let ctx = context_with(vec![twitter.clone()], "thanks for reaching out");

        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();

        assert_eq!(twitter.replies.lock().unwrap().len(), 2);
        assert!(
            ctx.store
                .get_hash("twitter:processed_mentions", "m1")
                .await
                .is_some()
        );
        assert_eq!(
            ctx.store.get("twitter:engagement_cursor").await.unwrap(),
            "m2"
        );
    }

    #[tokio::test]
    async fn processed_mentions_are_not_answered_twice() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        twitter.inbox.lock().unwrap().push(mention("m1", "hello"));
        let ctx = context_with(vec![twitter.clone()], "hi there");

        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();
        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();

        assert_eq!(twitter.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hostile_mentions_are_discarded_permanently() {
        let twitter = Arc::new(FakeSocial::new("twitter"));
        twitter
            .inbox
            .lock()
            .unwrap()
            .push(mention("m1", "<script>document.cookie</script>"));
        let ctx = context_with(vec![twitter.clone()], "reply");

        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();

        assert!(twitter.replies.lock().unwrap().is_empty());
        let record = ctx
            .store
            .get_hash("twitter:processed_mentions", "m1")
            .await
            .unwrap();
        assert_eq!(record["discarded"], true);
        assert_eq!(
            ctx.store.get("twitter:engagement_cursor").await.unwrap(),
            "m1"
        );
    }

    #[tokio::test]
    async fn reply_quota_is_respected() {
        use meridian_model::Period;

        let twitter = Arc::new(FakeSocial::new("twitter"));
        twitter.inbox.lock().unwrap().push(mention("m1", "hello"));
        let ctx = context_with(vec![twitter.clone()], "hi");
        for _ in 0..5 {
            ctx.limiter
                .increment_usage("twitter", "reply", Period::Hourly, 1)
                .await;
        }

        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();
        assert!(twitter.replies.lock().unwrap().is_empty());
        // Unanswered mentions stay eligible: not marked processed, and the
        // cursor did not move past them.
        assert!(
            ctx.store
                .get_hash("twitter:processed_mentions", "m1")
                .await
                .is_none()
        );
        assert_eq!(ctx.store.get("twitter:engagement_cursor").await, None);
    }
}
