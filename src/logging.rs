//! Tracing setup for the `docket` binary.
//!
//! Filter precedence is `DOCKET_LOG`, then `RUST_LOG`, then the configured
//! level. Console output goes to stderr so command output on stdout stays
//! parseable. When file logging is on, JSON lines are also written to a
//! daily rolling file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::docket_config::DocketConfig;

pub const LOG_ENV: &str = "DOCKET_LOG";
const LOG_FILE_PREFIX: &str = "docket.log";

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Fallback filter directive.
    pub level: String,
    pub json: bool,
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_config(config: &DocketConfig) -> Self {
        Self {
            level: config.log_level().to_string(),
            json: config.json_logs(),
            file_dir: config.toml.logging.file.then(|| config.log_dir()),
        }
    }
}

/// Keeps the background file writer alive. Drop it only at exit or
/// buffered lines are lost.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber.
pub fn init(settings: &LogSettings) -> Result<LoggingGuard> {
    let console = if settings.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    let (file_layer, guard) = match &settings.file_dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: guard })
}
