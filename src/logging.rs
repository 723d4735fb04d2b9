//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ApiError, Result};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// With `logging.file` set, output goes to a daily-rolling file through a
/// non-blocking writer; keep the returned guard alive so buffered lines are
/// flushed on exit.
pub fn init(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&logging.level))
    .map_err(|e| ApiError::Config(format!("Invalid logging.level '{}': {}", logging.level, e)))?;

  if let Some(path) = &logging.file {
    let directory = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
      .file_name()
      .ok_or_else(|| ApiError::Config(format!("Invalid log file path: {}", path.display())))?;

    std::fs::create_dir_all(directory)
      .map_err(|e| ApiError::Config(format!("Failed to create log directory: {}", e)))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .try_init()
      .map_err(|e| ApiError::Config(format!("Failed to install logger: {}", e)))?;
    return Ok(Some(guard));
  }

  // Log to stderr (default)
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init()
    .map_err(|e| ApiError::Config(format!("Failed to install logger: {}", e)))?;
  Ok(None)
}
