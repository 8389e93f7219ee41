use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use meridian_model::LoopState;

use crate::{ModuleRegistry, TaskError};

pub type CycleFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// One unit of work, invoked once per cycle with the loop's cancellation
/// token so long-running I/O can bail out early on shutdown.
pub type CycleFn = Arc<dyn Fn(CancellationToken) -> CycleFuture + Send + Sync>;

/// Wrap an async closure as a [`CycleFn`].
pub fn cycle_fn<F, Fut>(f: F) -> CycleFn
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Static description of a supervised loop.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: &'static str,
    /// Sleep between successful cycles.
    pub interval: Duration,
    /// Shorter sleep after a failed cycle; the loop never terminates on a
    /// cycle error.
    pub error_backoff: Duration,
    pub enabled: bool,
}

impl TaskSpec {
    pub fn new(name: &'static str, interval: Duration, error_backoff: Duration) -> Self {
        Self {
            name,
            interval,
            error_backoff,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug)]
struct LoopStatus {
    state: LoopState,
    last_run: Option<i64>,
    last_error: Option<String>,
}

/// Handle to one spawned loop: observable state plus the join handle the
/// supervisor reaps on shutdown.
pub struct LoopHandle {
    name: &'static str,
    status: Arc<RwLock<LoopStatus>>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn a supervised periodic loop onto the runtime.
    pub fn spawn(
        spec: TaskSpec,
        cycle: CycleFn,
        registry: ModuleRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let status = Arc::new(RwLock::new(LoopStatus {
            state: LoopState::Idle,
            last_run: None,
            last_error: None,
        }));
        let name = spec.name;
        let join = tokio::spawn(run_loop(spec, cycle, status.clone(), registry, cancel));
        Self { name, status, join }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LoopState {
        self.status.read().unwrap().state
    }

    /// Unix seconds of the last completed cycle, successful or not.
    pub fn last_run(&self) -> Option<i64> {
        self.status.read().unwrap().last_run
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.read().unwrap().last_error.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(crate) fn into_join(self) -> (&'static str, JoinHandle<()>) {
        (self.name, self.join)
    }
}

async fn run_loop(
    spec: TaskSpec,
    cycle: CycleFn,
    status: Arc<RwLock<LoopStatus>>,
    registry: ModuleRegistry,
    cancel: CancellationToken,
) {
    let set_state = |state: LoopState| {
        status.write().unwrap().state = state;
    };

    info!(task = spec.name, "task loop started");
    loop {
        if cancel.is_cancelled() {
            set_state(LoopState::Cancelled);
            info!(task = spec.name, "task loop cancelled");
            return;
        }

        set_state(LoopState::Running);
        // A cycle in flight runs to completion; cancellation is honored at
        // the sleep below, or inside the cycle via its token.
        let outcome = cycle(cancel.clone()).await;
        {
            let mut status = status.write().unwrap();
            status.last_run = Some(time::OffsetDateTime::now_utc().unix_timestamp());
        }

        let delay = match outcome {
            Ok(()) => {
                debug!(task = spec.name, "cycle completed");
                status.write().unwrap().last_error = None;
                spec.interval
            }
            Err(TaskError::Canceled) => {
                set_state(LoopState::Cancelled);
                info!(task = spec.name, "task loop cancelled");
                return;
            }
            Err(e) => {
                error!(task = spec.name, error = %e, "cycle failed, backing off");
                status.write().unwrap().last_error = Some(e.to_string());
                registry.record_error(format!("{}: {e}", spec.name));
                spec.error_backoff
            }
        };

        set_state(LoopState::Sleeping);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                set_state(LoopState::Cancelled);
                info!(task = spec.name, "task loop cancelled");
                return;
            }
        }
    }
}
