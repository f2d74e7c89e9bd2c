// crates/cli/src/render.rs
//! Terminal rendering of a job's progress.

use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use jobwatch_core::{JobProgress, ProgressView};
use serde_json::Value;

const BAR_TEMPLATE: &str = "  {prefix:.bold} [{bar:30.cyan/blue}] {percent:>3}% {msg}";
const SPINNER_TEMPLATE: &str = "  {spinner} {prefix:.bold} {msg}";

/// Draws one job as a spinner while its total is unknown and as a bar after.
pub struct ProgressRenderer {
    bar: ProgressBar,
    determinate: bool,
}

impl ProgressRenderer {
    pub fn new(label: &str) -> anyhow::Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template(SPINNER_TEMPLATE)?);
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self {
            bar,
            determinate: false,
        })
    }

    pub fn update(&mut self, progress: &JobProgress) -> anyhow::Result<()> {
        let view = ProgressView::from_progress(progress, Utc::now());
        if !view.indeterminate && !self.determinate {
            self.bar
                .set_style(ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("=> "));
            self.bar.disable_steady_tick();
            self.determinate = true;
        }
        if self.determinate {
            self.bar.set_length(100);
            self.bar.set_position(u64::from(view.percent));
        }

        let mut message = view.message.to_string();
        if let Some(eta) = view.eta {
            message.push_str(&format!(" (about {} left)", format_duration(eta)));
        }
        self.bar.set_message(message);
        Ok(())
    }

    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Compact duration: `45s`, `3m 07s`, `1h 02m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// One-line summary of a job's result payload, e.g. `n: 5, skipped: 2`.
/// Only scalar fields are shown; nested values are left for `--json`.
pub fn summarize_result(result: &Value) -> Option<String> {
    let fields = result.as_object()?;
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Number(n) => Some(format!("{key}: {n}")),
            Value::Bool(b) => Some(format!("{key}: {b}")),
            Value::String(s) => Some(format!("{key}: {s}")),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Final line for a finished job.
pub fn completion_line(progress: &JobProgress) -> String {
    let view = ProgressView::from_progress(progress, Utc::now());
    let elapsed = format_duration(view.elapsed);
    match view.result.and_then(summarize_result) {
        Some(summary) => format!("\u{2713} {} ({summary}) in {elapsed}", view.message),
        None => format!("\u{2713} {} in {elapsed}", view.message),
    }
}
