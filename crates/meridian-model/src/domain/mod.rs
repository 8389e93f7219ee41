mod period;
pub use period::Period;

mod limit;
pub use limit::{LimitCheck, PeriodUsage, UsageReport};

mod module_status;
pub use module_status::ModuleStatus;

mod loop_state;
pub use loop_state::LoopState;

mod health;
pub use health::{HealthSnapshot, ModuleHealth};

mod error;
pub use error::ModelError;

/// Platform identifier (lowercase, e.g. `"twitter"`).
///
/// Platforms are configuration-driven, so this stays a plain string rather
/// than a closed enum.
pub type Platform = String;

/// Action identifier within a platform (e.g. `"post"`, `"reply"`).
pub type Action = String;
