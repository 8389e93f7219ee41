use thiserror::Error;

/// Outcome of one task-loop cycle.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The cycle failed; the loop logs it and retries after its error backoff.
    #[error("{reason}")]
    Fail { reason: String },

    /// The cycle observed cancellation; the loop exits without retrying.
    #[error("canceled")]
    Canceled,
}

impl TaskError {
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("module probe failed: {0}")]
    Probe(String),
}
