use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use meridian_model::ModuleStatus;

use crate::{CoreError, CycleFn, LoopHandle, ModuleRegistry, TaskSpec, system};

const REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle hooks an external collaborator exposes to the supervisor.
///
/// `probe` runs once at startup to record connectivity in the health
/// registry; `close` runs at shutdown. Neither may bring the system down:
/// probe failures degrade status, close failures are logged and skipped.
#[async_trait]
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap connectivity check against the real backend.
    async fn probe(&self) -> Result<(), CoreError>;

    /// Release connections/sessions. Must be safe to call once at shutdown.
    async fn close(&self);
}

/// Owns the task loops and collaborator lifecycles.
///
/// Startup never aborts on an individual module failure; shutdown is
/// idempotent and runs on both the signal path and the top-level error path.
pub struct Supervisor {
    registry: ModuleRegistry,
    collaborators: Mutex<Vec<Arc<dyn Collaborator>>>,
    handles: Mutex<Vec<LoopHandle>>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl Supervisor {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            collaborators: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a collaborator for startup probing and ordered shutdown.
    /// Close order follows registration order.
    pub fn register(&self, collaborator: Arc<dyn Collaborator>) {
        self.collaborators.lock().unwrap().push(collaborator);
    }

    /// Probe every registered collaborator, recording statuses without
    /// aborting on individual failures.
    pub async fn startup(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(instance = system::instance_id(), "supervisor starting");

        let collaborators: Vec<_> = self.collaborators.lock().unwrap().clone();
        for collaborator in collaborators {
            let name = collaborator.name().to_string();
            match collaborator.probe().await {
                Ok(()) => {
                    info!(module = %name, "module connection verified");
                    self.registry.set_status(&name, ModuleStatus::Connected);
                }
                Err(e) => {
                    error!(module = %name, error = %e, "module probe failed");
                    self.registry.set_status(&name, ModuleStatus::Error);
                    self.registry.record_error(format!("{name}: {e}"));
                }
            }
        }
    }

    /// Spawn a task loop under this supervisor's cancellation domain.
    /// Disabled specs are skipped with a log line.
    pub fn spawn(&self, spec: TaskSpec, cycle: CycleFn) {
        if !spec.enabled {
            info!(task = spec.name, "task disabled, not starting");
            return;
        }
        let handle = LoopHandle::spawn(
            spec,
            cycle,
            self.registry.clone(),
            self.cancel.child_token(),
        );
        self.handles.lock().unwrap().push(handle);
    }

    pub fn active_loops(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Supervisory loop: periodically reap loops that ended on their own
    /// (a loop only ends early by panicking) and log their outcome. Returns
    /// when the supervisor is cancelled.
    pub async fn supervise(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(REAP_INTERVAL) => {}
            }

            let finished: Vec<LoopHandle> = {
                let mut handles = self.handles.lock().unwrap();
                let mut finished = Vec::new();
                let mut i = 0;
                while i < handles.len() {
                    if handles[i].is_finished() {
                        finished.push(handles.remove(i));
                    } else {
                        i += 1;
                    }
                }
                finished
            };

            for handle in finished {
                let (name, join) = handle.into_join();
                match join.await {
                    Ok(()) => warn!(task = name, "task loop ended unexpectedly"),
                    Err(e) => {
                        error!(task = name, error = %e, "task loop aborted");
                        self.registry.record_error(format!("{name}: {e}"));
                    }
                }
            }
        }
    }

    /// Cancel every loop, await their exits, and close collaborators in
    /// registration order. Safe to call more than once; only the first call
    /// does the work.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("supervisor shutting down");
        self.cancel.cancel();

        let handles: Vec<LoopHandle> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let (name, join) = handle.into_join();
            if let Err(e) = join.await {
                error!(task = name, error = %e, "task did not exit cleanly");
            }
        }

        let collaborators: Vec<_> = self.collaborators.lock().unwrap().clone();
        for collaborator in collaborators {
            info!(module = collaborator.name(), "closing module");
            collaborator.close().await;
        }

        info!("supervisor shutdown complete");
    }
}
