//! Tracing subscriber setup for hosts embedding the sync engine.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::ConfigError;

/// Build the filter for `level`, falling back to `info` on a bad directive.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber described by `config`.
///
/// When `config.file` is set, output goes to that file through a
/// non-blocking writer; keep the returned guard alive until shutdown so
/// buffered lines are flushed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = build_filter(&config.level);

    let Some(path) = &config.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .try_init()
            .map_err(|e| ConfigError::Logging(e.to_string()))?;
        return Ok(None);
    };

    let file_name = path.file_name().ok_or_else(|| ConfigError::InvalidValue {
        field: "logging.file".into(),
        detail: "log path must name a file".into(),
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    Ok(Some(guard))
}
