use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use meridian_model::{LimitCheck, Period, PeriodUsage, Platform, UsageReport};
use meridian_store::FailoverStore;

use crate::LimiterError;

/// Ceiling reported for unknown platforms and unconfigured periods.
///
/// Finite so percentage math stays meaningful; large enough to never block.
pub const UNLIMITED: u64 = 999_999;

/// Per-platform, per-period limits.
pub type LimitTable = HashMap<Platform, BTreeMap<Period, u64>>;

/// Default limits for the built-in platforms.
pub fn default_limits() -> LimitTable {
    let mut table = LimitTable::new();
    table.insert(
        "twitter".to_string(),
        BTreeMap::from([(Period::Hourly, 5), (Period::Daily, 50)]),
    );
    table.insert(
        "mastodon".to_string(),
        BTreeMap::from([(Period::Hourly, 10), (Period::Daily, 100)]),
    );
    table.insert(
        "discord".to_string(),
        BTreeMap::from([(Period::Hourly, 20), (Period::Daily, 200)]),
    );
    table
}

/// Multi-window rate limiter over the key-value store.
///
/// Counters live at `rate_limit:{platform}:{action}:{period}:{bucket}`; the
/// bucket identifier changes exactly at the window boundary, so a rollover
/// is just a fresh key and expiry needs no sweeper.
///
/// Check failures lean open: when the store cannot answer, the action is
/// permitted and the condition logged, keeping the business function alive
/// at the cost of strict quota enforcement.
pub struct RateLimiter {
    store: Arc<FailoverStore>,
    limits: RwLock<LimitTable>,
    now: fn() -> OffsetDateTime,
}

impl RateLimiter {
    pub fn new(store: Arc<FailoverStore>) -> Self {
        Self::with_limits(store, default_limits())
    }

    pub fn with_limits(store: Arc<FailoverStore>, limits: LimitTable) -> Self {
        Self {
            store,
            limits: RwLock::new(limits),
            now: OffsetDateTime::now_utc,
        }
    }

    /// Replace the wall clock; buckets and rollovers derive from it.
    pub fn with_clock(mut self, now: fn() -> OffsetDateTime) -> Self {
        self.now = now;
        self
    }

    fn counter_key(platform: &str, action: &str, period: Period, now: OffsetDateTime) -> String {
        format!(
            "rate_limit:{platform}:{action}:{period}:{}",
            period.bucket_key(now)
        )
    }

    fn limit_for(&self, platform: &str, period: Period) -> Option<u64> {
        let limits = self.limits.read().unwrap();
        limits.get(platform).and_then(|t| t.get(&period)).copied()
    }

    fn configured_periods(&self, platform: &str) -> Vec<Period> {
        let limits = self.limits.read().unwrap();
        limits
            .get(platform)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Merge new limits for a platform, creating it when unknown.
    pub fn update_limits(&self, platform: &str, new_limits: BTreeMap<Period, u64>) {
        let mut limits = self.limits.write().unwrap();
        limits
            .entry(platform.to_ascii_lowercase())
            .or_default()
            .extend(new_limits.iter());
        info!(platform, limits = ?new_limits, "rate limits updated");
    }

    /// Check one period's window. Unknown platforms and unconfigured periods
    /// are allowed with an effectively unlimited ceiling.
    pub async fn check(&self, platform: &str, action: &str, period: Period) -> (LimitCheck, u64, u64) {
        let platform = platform.to_ascii_lowercase();
        let Some(limit) = self.limit_for(&platform, period) else {
            warn!(%platform, %period, "no rate limit configured, allowing");
            return (LimitCheck::Allowed, 0, UNLIMITED);
        };

        let key = Self::counter_key(&platform, action, period, (self.now)());
        let current = read_count(self.store.get(&key).await);

        let check = LimitCheck::classify(current, limit);
        match check {
            LimitCheck::Exceeded => {
                warn!(%platform, action, %period, current, limit, "rate limit exceeded")
            }
            LimitCheck::Approaching => {
                warn!(%platform, action, %period, current, limit, "rate limit approaching")
            }
            LimitCheck::Allowed => {
                debug!(%platform, action, %period, current, limit, "rate limit ok")
            }
        }
        (check, current, limit)
    }

    /// Record usage against one period's bucket; returns the new count.
    ///
    /// The first write into a bucket stamps the period TTL on the entry so
    /// abandoned buckets get reclaimed even if never read again.
    pub async fn increment_usage(
        &self,
        platform: &str,
        action: &str,
        period: Period,
        amount: u64,
    ) -> u64 {
        let platform = platform.to_ascii_lowercase();
        let key = Self::counter_key(&platform, action, period, (self.now)());

        let new_count = self.store.increment(&key, amount as i64).await.max(0) as u64;
        if new_count == amount && new_count > 0 {
            self.store
                .set(&key, &Value::from(new_count), Some(period.ttl_seconds()))
                .await;
        }

        info!(%platform, action, %period, count = new_count, "usage recorded");
        new_count
    }

    /// Current usage across every configured period for a platform.
    pub async fn usage_stats(&self, platform: &str, action: &str) -> BTreeMap<Period, PeriodUsage> {
        let platform = platform.to_ascii_lowercase();
        let mut stats = BTreeMap::new();

        for period in self.configured_periods(&platform) {
            let (_, current, limit) = self.check(&platform, action, period).await;
            stats.insert(period, PeriodUsage::new(current, limit));
        }
        stats
    }

    /// Conjunctive decision across every configured period: the action is
    /// allowed only when no window is exceeded.
    pub async fn is_allowed(&self, platform: &str, action: &str) -> UsageReport {
        let platform = platform.to_ascii_lowercase();
        let mut report = UsageReport::new(platform.clone(), action);

        let periods = self.configured_periods(&platform);
        if periods.is_empty() {
            warn!(%platform, "unknown platform for rate limiting, allowing");
            return report;
        }

        for period in periods {
            let (_, current, limit) = self.check(&platform, action, period).await;
            report.record(period, PeriodUsage::new(current, limit));
        }
        report
    }

    /// Run `op` under the limiter: deny before invoking when any window is
    /// exhausted, and consume quota in every configured period only when the
    /// operation succeeds.
    pub async fn execute<T, E, F, Fut>(
        &self,
        platform: &str,
        action: &str,
        op: F,
    ) -> Result<T, LimiterError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let report = self.is_allowed(platform, action).await;
        if !report.allowed {
            return Err(LimiterError::LimitExceeded {
                platform: report.platform,
                action: report.action,
                period: report.blocked_by.unwrap_or(Period::Hourly),
            });
        }

        let out = op().await.map_err(LimiterError::Operation)?;

        for period in self.configured_periods(&platform.to_ascii_lowercase()) {
            self.increment_usage(platform, action, period, 1).await;
        }
        Ok(out)
    }

    /// Administrative reset of usage counters; all configured periods when
    /// `period` is `None`. Returns `false` for unknown platforms.
    pub async fn reset_usage(&self, platform: &str, action: &str, period: Option<Period>) -> bool {
        let platform = platform.to_ascii_lowercase();
        let periods = match period {
            Some(p) => vec![p],
            None => self.configured_periods(&platform),
        };
        if periods.is_empty() {
            return false;
        }

        for period in periods {
            let key = Self::counter_key(&platform, action, period, (self.now)());
            self.store.delete(&key).await;
            info!(%platform, action, %period, "usage counter reset");
        }
        true
    }

    /// Seconds until the current window for `period` rolls over.
    pub fn seconds_until_reset(&self, period: Period) -> u64 {
        period.seconds_until_rollover((self.now)())
    }
}

/// Counters may come back as numbers or as strings depending on which
/// backend served the read.
fn read_count(value: Option<Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0).max(0) as u64,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_store::MemoryBackend;
    use time::macros::datetime;

    fn store() -> Arc<FailoverStore> {
        Arc::new(FailoverStore::new(None, Arc::new(MemoryBackend::new())))
    }

    fn fixed_now() -> OffsetDateTime {
        datetime!(2024-06-01 13:30:00 UTC)
    }

    fn just_before_two() -> OffsetDateTime {
        datetime!(2024-06-01 13:59:59 UTC)
    }

    fn just_after_two() -> OffsetDateTime {
        datetime!(2024-06-01 14:00:01 UTC)
    }

    fn limiter(store: Arc<FailoverStore>) -> RateLimiter {
        RateLimiter::new(store).with_clock(fixed_now)
    }

    #[tokio::test]
    async fn allowed_below_ninety_percent() {
        let limiter = limiter(store());
        for _ in 0..3 {
            limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }
        let (check, current, limit) = limiter.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Allowed);
        assert_eq!((current, limit), (3, 5));
    }

    #[tokio::test]
    async fn approaching_at_ninety_percent() {
        let limiter = limiter(store());
        for _ in 0..49 {
            limiter.increment_usage("twitter", "post", Period::Daily, 1).await;
        }
        let (check, current, limit) = limiter.check("twitter", "post", Period::Daily).await;
        assert_eq!(check, LimitCheck::Approaching);
        assert_eq!((current, limit), (49, 50));
    }

    #[tokio::test]
    async fn exceeded_at_limit() {
        let limiter = limiter(store());
        for _ in 0..5 {
            limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }
        let (check, ..) = limiter.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Exceeded);
    }

    #[tokio::test]
    async fn unknown_platform_fails_open() {
        let limiter = limiter(store());
        let (check, current, limit) = limiter.check("myspace", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Allowed);
        assert_eq!((current, limit), (0, UNLIMITED));

        let report = limiter.is_allowed("myspace", "post").await;
        assert!(report.allowed);
        assert!(report.periods.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_period_fails_open() {
        let limiter = limiter(store());
        let (check, _, limit) = limiter.check("twitter", "post", Period::Monthly).await;
        assert_eq!(check, LimitCheck::Allowed);
        assert_eq!(limit, UNLIMITED);
    }

    #[tokio::test]
    async fn bucket_rolls_over_at_hour_boundary() {
        let shared = store();
        let before = RateLimiter::new(shared.clone()).with_clock(just_before_two);
        for _ in 0..5 {
            before.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }
        let (check, ..) = before.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Exceeded);

        // Same store, two seconds later: a fresh bucket with a fresh count.
        let after = RateLimiter::new(shared).with_clock(just_after_two);
        let (check, current, _) = after.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Allowed);
        assert_eq!(current, 0);
    }

    #[tokio::test]
    async fn conjunctive_policy_blocks_on_any_period() {
        let shared = store();
        let limiter = limiter(shared);
        // Exhaust the daily window only; the hourly counter stays at zero.
        for _ in 0..50 {
            limiter.increment_usage("twitter", "post", Period::Daily, 1).await;
        }

        let report = limiter.is_allowed("twitter", "post").await;
        assert!(!report.allowed);
        assert_eq!(report.blocked_by, Some(Period::Daily));
        // The hourly window still has headroom.
        assert!(report.periods[&Period::Hourly].current < 5);
    }

    #[tokio::test]
    async fn execute_increments_every_period_on_success() {
        let limiter = limiter(store());
        let out: Result<&str, LimiterError<std::io::Error>> =
            limiter.execute("twitter", "post", || async { Ok("posted") }).await;
        assert_eq!(out.unwrap(), "posted");

        let stats = limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 1);
        assert_eq!(stats[&Period::Daily].current, 1);
    }

    #[tokio::test]
    async fn execute_does_not_charge_failed_operations() {
        let limiter = limiter(store());
        let out: Result<(), LimiterError<String>> = limiter
            .execute("twitter", "post", || async { Err("api down".to_string()) })
            .await;
        assert!(matches!(out, Err(LimiterError::Operation(_))));

        let stats = limiter.usage_stats("twitter", "post").await;
        assert_eq!(stats[&Period::Hourly].current, 0);
        assert_eq!(stats[&Period::Daily].current, 0);
    }

    #[tokio::test]
    async fn execute_denies_without_invoking() {
        let limiter = limiter(store());
        for _ in 0..5 {
            limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }

        let mut invoked = false;
        let out: Result<(), LimiterError<String>> = limiter
            .execute("twitter", "post", || {
                invoked = true;
                async { Ok(()) }
            })
            .await;

        match out {
            Err(LimiterError::LimitExceeded { period, .. }) => {
                assert_eq!(period, Period::Hourly);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!invoked);
    }

    #[tokio::test]
    async fn reset_clears_counters() {
        let limiter = limiter(store());
        for _ in 0..5 {
            limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }
        assert!(limiter.reset_usage("twitter", "post", None).await);

        let (check, current, _) = limiter.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Allowed);
        assert_eq!(current, 0);

        assert!(!limiter.reset_usage("myspace", "post", None).await);
    }

    #[tokio::test]
    async fn update_limits_applies_immediately() {
        let limiter = limiter(store());
        limiter.update_limits("twitter", BTreeMap::from([(Period::Hourly, 1)]));

        limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        let (check, ..) = limiter.check("twitter", "post", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Exceeded);
    }

    #[tokio::test]
    async fn actions_are_tracked_separately() {
        let limiter = limiter(store());
        for _ in 0..5 {
            limiter.increment_usage("twitter", "post", Period::Hourly, 1).await;
        }
        let (check, ..) = limiter.check("twitter", "reply", Period::Hourly).await;
        assert_eq!(check, LimitCheck::Allowed);
    }

    #[test]
    fn seconds_until_reset_uses_clock() {
        let limiter = RateLimiter::new(store()).with_clock(fixed_now);
        assert_eq!(limiter.seconds_until_reset(Period::Hourly), 1_800);
    }

    #[test]
    fn counter_key_shape() {
        let key = RateLimiter::counter_key("twitter", "post", Period::Hourly, fixed_now());
        assert_eq!(key, "rate_limit:twitter:post:hourly:2024-06-01-13");
    }
}
