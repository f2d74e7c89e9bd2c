// crates/tracker/src/error.rs
use std::time::Duration;

use jobwatch_core::FailureReason;
use thiserror::Error;

/// Failures of a progress channel's underlying connection.
///
/// Any of these before a terminal frame makes the job's outcome unknown to
/// the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to progress stream {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Progress stream {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Progress stream read failed: {0}")]
    Read(String),

    #[error("Progress stream ended before a terminal frame")]
    StreamEnded,

    #[error("No progress frame received for {0:?}")]
    IdleTimeout(Duration),

    #[error("No progress stream registered for key {0}")]
    UnknownKey(String),
}

/// Caller misuse of [`crate::JobRegistry::track_job`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("Job id must not be empty")]
    EmptyJobId,

    #[error("Progress key must not be empty")]
    EmptyProgressKey,

    #[error("Job tracking requires a running Tokio runtime")]
    NoRuntime,
}

/// Errors from the start-job HTTP APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors from awaiting a tracked job to its end.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Job failed: {0}")]
    Failed(#[from] FailureReason),

    #[error("Job tracking was abandoned before an outcome was delivered")]
    Abandoned,
}
