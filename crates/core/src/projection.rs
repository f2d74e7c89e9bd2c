// crates/core/src/projection.rs
//! UI-ready projection of a [`JobProgress`] record.
//!
//! Pure derivation: recompute it whenever the record changes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::progress::{JobProgress, JobStatus};

/// Shown until the backend sends its first message.
pub const DEFAULT_MESSAGE: &str = "Processing…";

/// Rounded completion percentage, or `None` when the total is unknown.
pub fn percent_complete(current: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let ratio = current.min(total) as f64 / total as f64;
    Some((ratio * 100.0).round() as u8)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView<'a> {
    pub status: JobStatus,
    /// `0` when the total is unknown.
    pub percent: u8,
    /// Render a spinner rather than a bar.
    pub indeterminate: bool,
    pub message: &'a str,
    pub elapsed: Duration,
    /// Units processed per second, once anything has been processed.
    pub rate_per_sec: Option<f64>,
    pub eta: Option<Duration>,
    /// Passed through verbatim for a results panel.
    pub result: Option<&'a Value>,
    pub error_message: Option<&'a str>,
}

impl<'a> ProgressView<'a> {
    pub fn from_progress(progress: &'a JobProgress, now: DateTime<Utc>) -> Self {
        let terminal = progress.status.is_terminal();
        let end = if terminal { progress.updated_at } else { now };
        let elapsed = (end - progress.started_at).to_std().unwrap_or_default();

        let secs = elapsed.as_secs_f64();
        let rate_per_sec = (progress.current > 0 && secs > 0.0).then(|| progress.current as f64 / secs);

        let eta = match rate_per_sec {
            Some(rate) if !terminal && progress.total > progress.current => {
                let remaining = (progress.total - progress.current) as f64;
                Some(Duration::from_secs_f64(remaining / rate))
            }
            _ => None,
        };

        Self {
            status: progress.status,
            percent: percent_complete(progress.current, progress.total).unwrap_or(0),
            indeterminate: progress.total == 0 && !terminal,
            message: progress
                .message
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MESSAGE),
            elapsed,
            rate_per_sec,
            eta,
            result: progress.result.as_ref(),
            error_message: progress.error_message.as_deref(),
        }
    }
}
