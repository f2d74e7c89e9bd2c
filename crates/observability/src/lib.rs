// crates/observability/src/lib.rs
//! Logging setup shared by jobwatch binaries.
//!
//! Console output goes to stderr so it never interleaves with progress bars
//! or machine-readable stdout. An optional daily-rotated file layer writes
//! through a non-blocking worker; keep the returned guard alive until exit or
//! buffered lines are lost.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,jobwatch=info,jobwatch_tracker=info";

/// File name prefix for rotated log files.
pub const LOG_FILE_PREFIX: &str = "jobwatch.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_filter: String,
    /// One JSON object per line instead of human-readable text.
    pub json: bool,
    /// Also write logs to a daily file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            json: false,
            log_dir: None,
        }
    }
}

/// `RUST_LOG` if set and valid, else `default`.
pub fn env_filter(default: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default).with_context(|| format!("invalid log filter {default:?}")),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let mut guard = None;
    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter(&config.default_filter)?),
            )
        }
        None => None,
    };

    let console: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console.with_filter(env_filter(&config.default_filter)?))
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(!config.json);
        assert!(config.log_dir.is_none());
        assert!(config.default_filter.starts_with("warn"));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
