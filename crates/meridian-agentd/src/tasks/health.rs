use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meridian_core::{CycleFn, TaskError, TaskSpec, cycle_fn};

use crate::tasks::TaskContext;

pub const HEALTH_KEY: &str = "system:health";

/// Below this overall percentage the snapshot is logged as a warning.
const HEALTHY_THRESHOLD: f64 = 80.0;

pub fn spec() -> TaskSpec {
    TaskSpec::new(
        "health_check",
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

/// Recompute the health snapshot and persist the latest copy for external
/// observers.
async fn run_cycle(ctx: &TaskContext, cancel: &CancellationToken) -> Result<(), TaskError> {
    if cancel.is_cancelled() {
        return Err(TaskError::Canceled);
    }

    let snapshot = ctx.registry.health_snapshot();
    let value = serde_json::to_value(&snapshot)
        .map_err(|e| TaskError::fail(format!("health snapshot serialization: {e}")))?;
    ctx.store.set(HEALTH_KEY, &value, None).await;

    if snapshot.overall_health >= HEALTHY_THRESHOLD {
        info!(health = snapshot.overall_health, "system health ok");
    } else {
        warn!(
            health = snapshot.overall_health,
            errors = snapshot.error_count,
            "system health degraded"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{FakeSocial, context_with};
    use meridian_model::ModuleStatus;

    #[tokio::test]
    async fn snapshot_is_persisted() {
        let ctx = context_with(vec![Arc::new(FakeSocial::new("twitter"))], "x");
        ctx.registry.set_status("store", ModuleStatus::Connected);
        ctx.registry.set_status("twitter", ModuleStatus::Error);
        ctx.registry.record_error("twitter probe failed");

        run_cycle(&ctx, &CancellationToken::new()).await.unwrap();

        let stored = ctx.store.get(HEALTH_KEY).await.unwrap();
        assert_eq!(stored["overallHealth"], 45.0);
        assert_eq!(stored["errorCount"], 1);
        assert_eq!(stored["modules"]["store"]["status"], "connected");
    }
}
