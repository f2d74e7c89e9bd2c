// crates/core/src/progress.rs
//! Job status, the live progress record, and the wire frame that updates it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;

/// Status of a server-side job as seen by the client.
///
/// Transitions are monotonic: `queued → running → {completed | failed}`.
/// A job may also jump straight from `queued` to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `true` for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the status order.
    ///
    /// Staying in the same non-terminal state is allowed; nothing leaves a
    /// terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live record for one tracked job.
///
/// Owned by the registry and updated in place as frames arrive; readers get
/// clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub progress_key: String,
    pub context_id: String,
    pub context_name: String,
    pub status: JobStatus,
    pub current: u64,
    /// `0` means the total is not known yet.
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Present only once `status == completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present only once `status == failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    /// Create a fresh `queued` record.
    pub fn new(
        job_id: impl Into<String>,
        progress_key: impl Into<String>,
        context_id: impl Into<String>,
        context_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            progress_key: progress_key.into(),
            context_id: context_id.into(),
            context_name: context_name.into(),
            status: JobStatus::Queued,
            current: 0,
            total: 0,
            message: None,
            result: None,
            error_message: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Merge a frame into the record, field by field.
    ///
    /// Fields missing from the frame keep their previous value. Frames that
    /// arrive after a terminal state are ignored, as are status regressions.
    /// Returns `true` only when this frame moved the job into a terminal state.
    pub fn apply(&mut self, frame: &ProgressFrame, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            tracing::debug!(job_id = %self.job_id, status = %self.status, "ignoring frame after terminal state");
            return false;
        }

        if let Some(total) = frame.total {
            self.total = total;
        }
        if let Some(current) = frame.current {
            self.current = current;
        }
        if self.total > 0 && self.current > self.total {
            self.current = self.total;
        }
        if let Some(message) = &frame.message {
            self.message = Some(message.clone());
        }
        self.updated_at = now;

        let Some(next) = frame.status else {
            return false;
        };
        if next == self.status {
            return false;
        }
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                job_id = %self.job_id,
                from = %self.status,
                to = %next,
                "ignoring out-of-order status"
            );
            return false;
        }

        self.status = next;
        match next {
            JobStatus::Completed => {
                self.result = frame.result.clone();
            }
            JobStatus::Failed => {
                let error = frame
                    .error
                    .clone()
                    .or_else(|| self.message.clone())
                    .unwrap_or_else(|| "Job failed".to_string());
                self.error_message = Some(error);
            }
            JobStatus::Queued | JobStatus::Running => {}
        }
        next.is_terminal()
    }
}

/// One update from a progress stream.
///
/// Every field is optional: a field that is absent (or `null`) means
/// "unchanged", never "reset".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        alias = "errorMessage",
        alias = "error_message",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

impl ProgressFrame {
    /// Decode the JSON payload of one stream event.
    pub fn parse(data: &str) -> Result<Self, FrameError> {
        let data = data.trim();
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(serde_json::from_str(data)?)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    pub fn progress(current: u64, total: u64) -> Self {
        Self {
            status: Some(JobStatus::Running),
            current: Some(current),
            total: Some(total),
            ..Self::default()
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record() -> JobProgress {
        JobProgress::new("j1", "key-1", "person-7", "Alice", Utc::now())
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_status_pending_alias() {
        let status: JobStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, JobStatus::Queued);
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"queued\"");
    }

    #[test]
    fn test_apply_merges_missing_fields() {
        let mut job = record();
        job.apply(&ProgressFrame::progress(3, 10), Utc::now());
        job.apply(
            &ProgressFrame {
                message: Some("Scanning photos".into()),
                ..ProgressFrame::default()
            },
            Utc::now(),
        );

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.current, 3);
        assert_eq!(job.total, 10);
        assert_eq!(job.message.as_deref(), Some("Scanning photos"));
    }

    #[test]
    fn test_apply_clamps_current_to_total() {
        let mut job = record();
        job.apply(&ProgressFrame::progress(12, 10), Utc::now());
        assert_eq!(job.current, 10);
    }

    #[test]
    fn test_apply_keeps_current_when_total_unknown() {
        let mut job = record();
        job.apply(&ProgressFrame::progress(12, 0), Utc::now());
        assert_eq!(job.current, 12);
    }

    #[test]
    fn test_apply_reports_terminal_once() {
        let mut job = record();
        assert!(!job.apply(&ProgressFrame::progress(1, 2), Utc::now()));
        assert!(job.apply(&ProgressFrame::completed(json!({"n": 5})), Utc::now()));
        assert_eq!(job.result, Some(json!({"n": 5})));

        // Nothing leaves a terminal state.
        assert!(!job.apply(&ProgressFrame::failed("late"), Utc::now()));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error_message, None);
    }

    #[test]
    fn test_apply_ignores_status_regression() {
        let mut job = record();
        job.apply(&ProgressFrame::progress(5, 10), Utc::now());
        job.apply(
            &ProgressFrame {
                status: Some(JobStatus::Queued),
                current: Some(6),
                ..ProgressFrame::default()
            },
            Utc::now(),
        );
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.current, 6);
    }

    #[test]
    fn test_apply_failure_message_fallbacks() {
        let mut job = record();
        job.apply(&ProgressFrame::failed("model not loaded"), Utc::now());
        assert_eq!(job.error_message.as_deref(), Some("model not loaded"));

        let mut job = record();
        job.apply(
            &ProgressFrame {
                status: Some(JobStatus::Failed),
                message: Some("Out of disk".into()),
                ..ProgressFrame::default()
            },
            Utc::now(),
        );
        assert_eq!(job.error_message.as_deref(), Some("Out of disk"));

        let mut job = record();
        job.apply(
            &ProgressFrame {
                status: Some(JobStatus::Failed),
                ..ProgressFrame::default()
            },
            Utc::now(),
        );
        assert_eq!(job.error_message.as_deref(), Some("Job failed"));
    }

    #[test]
    fn test_result_ignored_before_completion() {
        let mut job = record();
        job.apply(
            &ProgressFrame {
                status: Some(JobStatus::Running),
                result: Some(json!({"n": 1})),
                ..ProgressFrame::default()
            },
            Utc::now(),
        );
        assert_eq!(job.result, None);
    }

    #[test]
    fn test_parse_frame() {
        let frame = ProgressFrame::parse(
            r#"{"status":"running","current":3,"total":10,"message":"Detecting faces"}"#,
        )
        .unwrap();
        assert_eq!(frame.status, Some(JobStatus::Running));
        assert_eq!(frame.current, Some(3));
        assert_eq!(frame.message.as_deref(), Some("Detecting faces"));
        assert!(!frame.is_terminal());

        let frame = ProgressFrame::parse(r#"{"status":"failed","error":"boom"}"#).unwrap();
        assert!(frame.is_terminal());
        assert_eq!(frame.error.as_deref(), Some("boom"));

        let frame = ProgressFrame::parse(r#"{"status":"failed","errorMessage":"boom"}"#).unwrap();
        assert_eq!(frame.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_parse_null_fields_are_unchanged() {
        let frame = ProgressFrame::parse(r#"{"current":4,"message":null}"#).unwrap();
        let mut job = record();
        job.message = Some("kept".into());
        job.apply(&frame, Utc::now());
        assert_eq!(job.message.as_deref(), Some("kept"));
        assert_eq!(job.current, 4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(ProgressFrame::parse("  "), Err(FrameError::Empty)));
        assert!(matches!(
            ProgressFrame::parse("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ProgressFrame::parse(r#"{"status":"exploded"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_job_progress_serialize() {
        let job = record();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"jobId\":\"j1\""));
        assert!(json.contains("\"progressKey\":\"key-1\""));
        assert!(json.contains("\"status\":\"queued\""));
        assert!(!json.contains("errorMessage"));
    }
}
