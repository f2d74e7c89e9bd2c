// crates/core/src/outcome.rs
//! Terminal outcome of a tracked job, delivered once per subscriber.

use thiserror::Error;

use crate::progress::{JobProgress, JobStatus};

/// User-facing text for a progress stream that dropped before the job finished.
pub const CONNECTION_LOST_MESSAGE: &str =
    "Lost connection to the job progress stream; the job may still be running on the server";

/// Why a tracked job did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The backend reported `failed`. Definitive.
    #[error("{message}")]
    JobFailed { message: String },

    /// The progress stream dropped before a terminal frame. The server-side
    /// outcome is unknown.
    #[error("Lost connection to the job progress stream ({detail})")]
    ConnectionLost { detail: String },
}

impl FailureReason {
    /// Message suitable for a toast or error banner.
    pub fn message(&self) -> String {
        match self {
            Self::JobFailed { message } => message.clone(),
            Self::ConnectionLost { .. } => CONNECTION_LOST_MESSAGE.to_string(),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// What a subscriber receives when its job ends.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobProgress),
    Failed(FailureReason),
}

impl JobOutcome {
    /// Build the outcome for a record in a terminal state; `None` otherwise.
    pub fn from_terminal(progress: &JobProgress) -> Option<Self> {
        match progress.status {
            JobStatus::Completed => Some(Self::Completed(progress.clone())),
            JobStatus::Failed => Some(Self::Failed(FailureReason::JobFailed {
                message: progress
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Job failed".to_string()),
            })),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_result(self) -> Result<JobProgress, FailureReason> {
        match self {
            Self::Completed(progress) => Ok(progress),
            Self::Failed(reason) => Err(reason),
        }
    }
}
