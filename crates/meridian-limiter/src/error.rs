use thiserror::Error;

use meridian_model::Period;

/// Failure modes of a rate-limited execution.
///
/// A denial is control flow, not a fault: callers are expected to skip the
/// action and move on.
#[derive(Debug, Error)]
pub enum LimiterError<E> {
    #[error("rate limit exceeded for {platform} {action} ({period})")]
    LimitExceeded {
        platform: String,
        action: String,
        /// The period whose window is exhausted.
        period: Period,
    },

    /// The wrapped operation itself failed; no quota was consumed.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> LimiterError<E> {
    /// Returns `true` when the failure is a quota denial rather than an
    /// operation error.
    pub fn is_denied(&self) -> bool {
        matches!(self, LimiterError::LimitExceeded { .. })
    }
}
