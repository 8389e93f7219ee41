use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid period: {0} (expected: hourly|daily|weekly|monthly)")]
    InvalidPeriod(String),
}
