// crates/tracker/src/lib.rs
//! Client-side tracking of server-executed jobs.
//!
//! A [`JobRegistry`] holds one live record per job and opens at most one
//! progress channel per job, however many callers track it. Callers get a
//! [`Subscription`] each; disposing it stops their callback without stopping
//! the job, and the [`Notifier`] still reports the end.

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod flows;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod sse;
pub mod subscription;
pub mod transport;

pub use api::{BackendClient, StartedJob};
pub use channel::{ChannelEvent, ChannelState, ProgressChannel};
pub use config::TrackerConfig;
pub use error::{ApiError, JobError, TrackError, TransportError};
pub use flows::{run_feature_job, start_feature_job, FeatureHandle, FeatureJob, FeatureRun, RunMode};
pub use notify::{
    ChannelNotifier, NoopNotifier, Notification, NotificationKind, NotificationOutcome, Notifier, TracingNotifier,
};
pub use registry::{JobRegistry, TrackRequest};
pub use subscription::{JobWatch, Subscription};
pub use transport::{HttpTransport, MemoryStreamSender, MemoryTransport, ProgressTransport};

pub use jobwatch_core::{FailureReason, JobOutcome, JobProgress, JobStatus, ProgressFrame, ProgressView};
