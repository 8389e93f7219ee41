use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use time::OffsetDateTime;
use tracing::debug;

use meridian_model::{HealthSnapshot, ModuleHealth, ModuleStatus};

const MAX_RECENT_ERRORS: usize = 100;

/// Shared record of per-module status and accumulated errors.
///
/// Cloned into every task loop; the supervisor computes health snapshots
/// from it on demand.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

struct RegistryInner {
    statuses: BTreeMap<String, ModuleStatus>,
    recent_errors: Vec<String>,
    total_errors: usize,
    started_at: Instant,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                statuses: BTreeMap::new(),
                recent_errors: Vec::new(),
                total_errors: 0,
                started_at: Instant::now(),
            })),
        }
    }

    pub fn set_status(&self, module: &str, status: ModuleStatus) {
        let mut inner = self.inner.write().unwrap();
        debug!(module, status = status.as_str(), "module status updated");
        inner.statuses.insert(module.to_string(), status);
    }

    pub fn status(&self, module: &str) -> Option<ModuleStatus> {
        let inner = self.inner.read().unwrap();
        inner.statuses.get(module).copied()
    }

    /// Record an error against the health ledger, keeping only the most
    /// recent messages but counting all of them.
    pub fn record_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().unwrap();
        inner.total_errors += 1;
        inner.recent_errors.push(message.into());
        if inner.recent_errors.len() > MAX_RECENT_ERRORS {
            let excess = inner.recent_errors.len() - MAX_RECENT_ERRORS;
            inner.recent_errors.drain(..excess);
        }
    }

    pub fn error_count(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.total_errors
    }

    pub fn uptime_seconds(&self) -> u64 {
        let inner = self.inner.read().unwrap();
        inner.started_at.elapsed().as_secs()
    }

    /// Recompute the health snapshot from current state.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read().unwrap();
        let modules: BTreeMap<String, ModuleHealth> = inner
            .statuses
            .iter()
            .map(|(name, status)| (name.clone(), ModuleHealth::from(*status)))
            .collect();
        let overall_health = HealthSnapshot::overall(&modules, inner.total_errors);

        HealthSnapshot {
            generated_at: OffsetDateTime::now_utc().unix_timestamp(),
            uptime_seconds: inner.started_at.elapsed().as_secs(),
            modules,
            error_count: inner.total_errors,
            recent_errors: inner.recent_errors.clone(),
            overall_health,
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_read_status() {
        let registry = ModuleRegistry::new();
        registry.set_status("store", ModuleStatus::Connected);

        assert_eq!(registry.status("store"), Some(ModuleStatus::Connected));
        assert_eq!(registry.status("missing"), None);
    }

    #[test]
    fn snapshot_matches_health_formula() {
        let registry = ModuleRegistry::new();
        registry.set_status("store", ModuleStatus::Connected);
        registry.set_status("twitter", ModuleStatus::Connected);
        registry.set_status("payments", ModuleStatus::Active);
        registry.set_status("mastodon", ModuleStatus::Error);
        registry.record_error("mastodon probe failed");
        registry.record_error("cycle failed");

        let snapshot = registry.health_snapshot();
        assert_eq!(snapshot.overall_health, 65.0);
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.modules.len(), 4);
        assert!(!snapshot.modules["mastodon"].healthy);
    }

    #[test]
    fn recent_errors_are_bounded_but_counted() {
        let registry = ModuleRegistry::new();
        for i in 0..150 {
            registry.record_error(format!("error {i}"));
        }

        let snapshot = registry.health_snapshot();
        assert_eq!(snapshot.error_count, 150);
        assert_eq!(snapshot.recent_errors.len(), 100);
        assert_eq!(snapshot.recent_errors[0], "error 50");
        assert_eq!(snapshot.recent_errors[99], "error 149");
    }

    #[test]
    fn status_updates_overwrite() {
        let registry = ModuleRegistry::new();
        registry.set_status("store", ModuleStatus::Connected);
        registry.set_status("store", ModuleStatus::Fallback);
        assert_eq!(registry.status("store"), Some(ModuleStatus::Fallback));
    }
}
