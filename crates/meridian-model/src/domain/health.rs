use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModuleStatus;

/// Health of one module as seen at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleHealth {
    pub status: ModuleStatus,
    pub healthy: bool,
}

impl From<ModuleStatus> for ModuleHealth {
    fn from(status: ModuleStatus) -> Self {
        Self {
            status,
            healthy: status.is_healthy(),
        }
    }
}

/// Point-in-time view of system health; recomputed on demand, never stored
/// as the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Unix seconds at which the snapshot was taken.
    pub generated_at: i64,
    pub uptime_seconds: u64,
    pub modules: BTreeMap<String, ModuleHealth>,
    /// Total errors accumulated since startup.
    pub error_count: usize,
    /// Most recent error messages, oldest first (bounded).
    pub recent_errors: Vec<String>,
    /// `max(0, module_health - min(error_count * 5, 50))` where module health
    /// is the percentage of modules reporting connected/active.
    pub overall_health: f64,
}

impl HealthSnapshot {
    /// Compute overall health from module statuses and the error count.
    pub fn overall(modules: &BTreeMap<String, ModuleHealth>, error_count: usize) -> f64 {
        if modules.is_empty() {
            return 0.0;
        }
        let healthy = modules.values().filter(|m| m.healthy).count();
        let module_health = healthy as f64 / modules.len() as f64 * 100.0;
        let penalty = (error_count as f64 * 5.0).min(50.0);
        (module_health - penalty).max(0.0)
    }
}
