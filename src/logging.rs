//! File logging for the terminal client.
//!
//! Stdout belongs to the conversation, so every event goes to a daily rolling
//! `app.log` under the configured log directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "app.log";

/// Filter directives override, in `tracing_subscriber::EnvFilter` syntax.
pub const LOG_FILTER_ENV_VAR: &str = "CHATBOT_LITE_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid CHATBOT_LITE_LOG directives: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
}

/// Installs the global subscriber.
///
/// The returned guard flushes buffered events when dropped and must live as
/// long as the process logs. Installing twice keeps the first subscriber.
pub fn init(log_dir: &Path) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let filter = env_filter(std::env::var(LOG_FILTER_ENV_VAR).ok().as_deref())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }

    Ok(guard)
}

fn env_filter(directives: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match directives.map(str::trim).filter(|value| !value.is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}
