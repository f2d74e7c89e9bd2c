// crates/tracker/src/config.rs
//! Tracker configuration.

use std::time::Duration;

/// Placeholder in [`TrackerConfig::progress_path`] replaced by the progress key.
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Configuration for the registry, its HTTP transport and the start-job client.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// JOBWATCH_BASE_URL env var (e.g. http://127.0.0.1:8000).
    pub base_url: String,
    /// Path of the progress stream, with `{key}` for the progress key.
    pub progress_path: String,
    pub connect_timeout: Duration,
    /// Treat a channel as lost when no frame arrives for this long.
    /// `None` = wait indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            progress_path: "/api/v1/jobs/{key}/progress".into(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `JOBWATCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("JOBWATCH_BASE_URL").filter(|v| !v.is_empty()) {
            config.base_url = url;
        }
        if let Some(path) = lookup("JOBWATCH_PROGRESS_PATH").filter(|v| !v.is_empty()) {
            config.progress_path = path;
        }
        if let Some(secs) = parse_secs(&lookup, "JOBWATCH_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_secs(&lookup, "JOBWATCH_IDLE_TIMEOUT_SECS") {
            // 0 disables the idle timeout
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Join `path` onto the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Full URL of the progress stream for `progress_key`.
    pub fn progress_url(&self, progress_key: &str) -> String {
        let path = self
            .progress_path
            .replace(KEY_PLACEHOLDER, &urlencoding::encode(progress_key));
        self.url(&path)
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(secs) => Some(secs),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, "ignoring invalid duration: {e}");
            None
        }
    }
}
