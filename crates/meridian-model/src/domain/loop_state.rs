use serde::{Deserialize, Serialize};

/// Execution state of one supervised task loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    /// Spawned but has not started its first cycle.
    Idle,
    /// A cycle is in flight.
    Running,
    /// Waiting out the interval (or error backoff) before the next cycle.
    Sleeping,
    /// Cancelled by shutdown; the loop will run no further cycles.
    Cancelled,
}

impl LoopState {
    /// Returns `true` once the loop will never run another cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancelled_is_terminal() {
        assert!(LoopState::Cancelled.is_terminal());
        assert!(!LoopState::Idle.is_terminal());
        assert!(!LoopState::Running.is_terminal());
        assert!(!LoopState::Sleeping.is_terminal());
    }
}
