mod error;
pub use error::LimiterError;

mod limiter;
pub use limiter::{LimitTable, RateLimiter, UNLIMITED, default_limits};
