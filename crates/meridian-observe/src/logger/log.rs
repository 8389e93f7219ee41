use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

pub struct Logger;

impl Logger {
    /// Install the global subscriber described by `cfg`.
    pub fn init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        match cfg.format {
            LoggerFormat::Text => Self::text(cfg),
            LoggerFormat::Json => Self::json(cfg),
            LoggerFormat::Journald => Self::journald(cfg),
        }
    }

    pub fn text(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        let fmt_layer = fmt::layer()
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer());

        match &cfg.file {
            Some(path) => {
                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer())
                    .with_writer(open_log_file(path)?);
                init_with(
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer)
                        .with(file_layer),
                )
            }
            None => init_with(tracing_subscriber::registry().with(filter).with(fmt_layer)),
        }
    }

    pub fn json(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        let fmt_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer());

        match &cfg.file {
            Some(path) => {
                let file_layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer())
                    .with_writer(open_log_file(path)?);
                init_with(
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer)
                        .with(file_layer),
                )
            }
            None => init_with(tracing_subscriber::registry().with(filter).with(fmt_layer)),
        }
    }

    pub fn journald(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        mk_journald(filter)
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn mk_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn open_log_file(path: &Path) -> Result<Arc<File>, LoggerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LoggerError::FileOpen(e.to_string()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggerError::FileOpen(e.to_string()))?;
    Ok(Arc::new(file))
}

fn as_error(e: impl std::fmt::Display) -> LoggerError {
    let s = e.to_string();
    if s.contains("SetGlobalDefaultError") {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::InitializationFailed(s)
    }
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(as_error)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn mk_journald(filter: EnvFilter) -> Result<(), LoggerError> {
    let journald = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?;
    let subscriber = tracing_subscriber::registry().with(filter).with(journald);
    init_with(subscriber)
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn mk_journald(_filter: EnvFilter) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
