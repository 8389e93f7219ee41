use serde::{Deserialize, Serialize};

/// Connectivity/liveness state of one external module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleStatus {
    /// Connectivity verified against the real backend.
    Connected,
    /// Running and doing work (long-lived modules without a probe target).
    Active,
    /// Degraded to a local substitute (e.g. file storage instead of the cache).
    Fallback,
    /// Probe or runtime failure; the module is not usable right now.
    Error,
}

impl ModuleStatus {
    /// Healthy modules count toward the module-health percentage.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ModuleStatus::Connected | ModuleStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Connected => "connected",
            ModuleStatus::Active => "active",
            ModuleStatus::Fallback => "fallback",
            ModuleStatus::Error => "error",
        }
    }
}
