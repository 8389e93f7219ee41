use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Action, Period, Platform};

/// Outcome of a single-period rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitCheck {
    /// Usage is comfortably below the limit.
    Allowed,
    /// Usage is at or above 90% of the limit; the action is still permitted.
    Approaching,
    /// The limit is reached; the action is denied.
    Exceeded,
}

impl LimitCheck {
    /// Returns `true` if the action must be denied.
    pub fn is_blocked(&self) -> bool {
        matches!(self, LimitCheck::Exceeded)
    }

    /// Classify a current count against a limit.
    pub fn classify(current: u64, limit: u64) -> Self {
        if current >= limit {
            LimitCheck::Exceeded
        } else if current * 10 >= limit * 9 {
            LimitCheck::Approaching
        } else {
            LimitCheck::Allowed
        }
    }
}

/// Usage within one period window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodUsage {
    pub result: LimitCheck,
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Percentage of the limit consumed, rounded to one decimal.
    pub percentage: f64,
}

impl PeriodUsage {
    pub fn new(current: u64, limit: u64) -> Self {
        let percentage = if limit > 0 {
            (current as f64 / limit as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            result: LimitCheck::classify(current, limit),
            current,
            limit,
            remaining: limit.saturating_sub(current),
            percentage,
        }
    }
}

/// Per-platform decision across every configured period.
///
/// The decision is conjunctive: one exceeded period blocks the action even
/// when every other window has headroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub platform: Platform,
    pub action: Action,
    pub allowed: bool,
    /// First period found exceeded, when the action is blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<Period>,
    pub periods: BTreeMap<Period, PeriodUsage>,
}

impl UsageReport {
    pub fn new(platform: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            action: action.into(),
            allowed: true,
            blocked_by: None,
            periods: BTreeMap::new(),
        }
    }

    /// Record one period's usage, demoting the report to blocked if needed.
    pub fn record(&mut self, period: Period, usage: PeriodUsage) {
        if usage.result.is_blocked() && self.allowed {
            self.allowed = false;
            self.blocked_by = Some(period);
        }
        self.periods.insert(period, usage);
    }
}
