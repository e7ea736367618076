use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "AICHAT_LOG";
const LOG_FILE_NAME: &str = "aichat.log";

#[derive(Debug, Clone)]
pub enum LoggingDestination {
    /// stderr plus `<dir>/aichat.log`; the desktop app has no console.
    FileAndStderr(PathBuf),
    StderrOnly,
}

struct LoggingGuards {
    _guard: Option<WorkerGuard>,
    log_path: Option<PathBuf>,
}

static LOGGING_STATE: OnceLock<LoggingGuards> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log directory: {0}")]
    Io(#[from] io::Error),
    #[error("invalid logging filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install logging subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber. The first call wins.
pub fn init_logging(destination: LoggingDestination) -> Result<Option<&'static Path>, LoggingError> {
    if LOGGING_STATE.get().is_none() {
        let guards = install(destination)?;
        let _ = LOGGING_STATE.set(guards);
    }
    Ok(LOGGING_STATE.get().and_then(|g| g.log_path.as_deref()))
}

fn install(destination: LoggingDestination) -> Result<LoggingGuards, LoggingError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .boxed();

    let (file_layer, guard, log_path) = match destination {
        LoggingDestination::FileAndStderr(dir) => {
            fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard), Some(dir.join(LOG_FILE_NAME)))
        }
        LoggingDestination::StderrOnly => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter()?)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(path) = &log_path {
        tracing::info!(path = %path.display(), "file logging enabled");
    }
    Ok(LoggingGuards { _guard: guard, log_path })
}

fn build_filter() -> Result<EnvFilter, ParseError> {
    if let Ok(directives) = env::var(LOG_ENV) {
        if !directives.trim().is_empty() {
            return EnvFilter::try_new(directives);
        }
    }
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new("info"),
    }
}
