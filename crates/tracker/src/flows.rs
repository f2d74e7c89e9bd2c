// crates/tracker/src/flows.rs
//! Call-site flows for the features that start long-running jobs.
//!
//! Each flow starts a job through [`BackendClient`], tracks it right away,
//! and then either waits for the outcome (foreground) or lets it run in the
//! background, where only the [`Notifier`](crate::Notifier) reports the end.

use jobwatch_core::{JobOutcome, JobProgress};
use tokio::sync::oneshot;
use tracing::info;

use crate::api::{BackendClient, StartedJob};
use crate::error::{ApiError, JobError};
use crate::registry::JobRegistry;
use crate::subscription::Subscription;

/// A feature that runs as a backend job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureJob {
    /// Find more face suggestions for a person.
    FindMore {
        person_id: String,
        person_name: String,
        limit: Option<u32>,
    },
    /// Detect faces across a directory of photos.
    FaceDetection { directory: String, recursive: bool },
    /// Recompute a person's match centroids.
    Centroids { person_id: String, person_name: String },
}

impl FeatureJob {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FindMore { .. } => "find_more",
            Self::FaceDetection { .. } => "face_detection",
            Self::Centroids { .. } => "centroids",
        }
    }

    /// Entity the job works on, as `(context_id, context_name)`.
    pub fn context(&self) -> (String, String) {
        match self {
            Self::FindMore {
                person_id,
                person_name,
                ..
            }
            | Self::Centroids {
                person_id,
                person_name,
            } => (person_id.clone(), person_name.clone()),
            Self::FaceDetection { directory, .. } => (directory.clone(), directory.clone()),
        }
    }

    async fn start(&self, client: &BackendClient) -> Result<StartedJob, ApiError> {
        match self {
            Self::FindMore { person_id, limit, .. } => client.start_find_more(person_id, *limit).await,
            Self::FaceDetection { directory, recursive } => {
                client.start_face_detection(directory, *recursive).await
            }
            Self::Centroids { person_id, .. } => client.start_centroid_computation(person_id).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Wait for the job to end.
    #[default]
    Foreground,
    /// Return as soon as the job is tracked.
    Background,
}

/// What [`run_feature_job`] returns.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureRun {
    Finished(JobProgress),
    Detached { job_id: String },
}

/// A started and tracked feature job.
#[derive(Debug)]
pub struct FeatureHandle {
    pub started: StartedJob,
    subscription: Subscription,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl FeatureHandle {
    pub fn job_id(&self) -> &str {
        &self.started.job_id
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn subscription_mut(&mut self) -> &mut Subscription {
        &mut self.subscription
    }

    /// Wait for the job to end.
    pub async fn wait(self) -> Result<JobProgress, JobError> {
        let Self {
            subscription,
            outcome,
            ..
        } = self;
        let outcome = outcome.await.map_err(|_| JobError::Abandoned)?;
        drop(subscription);
        Ok(outcome.into_result()?)
    }

    /// Stop observing and leave the job running; returns its id.
    pub fn detach(self) -> String {
        self.subscription.dispose();
        info!(job_id = %self.started.job_id, "job continues in background");
        self.started.job_id
    }
}

/// Start `job` and track it immediately.
pub async fn start_feature_job(
    client: &BackendClient,
    registry: &JobRegistry,
    job: &FeatureJob,
) -> Result<FeatureHandle, JobError> {
    let started = job.start(client).await?;
    info!(
        feature = job.label(),
        job_id = %started.job_id,
        progress_key = %started.progress_key,
        "job started"
    );
    let (context_id, context_name) = job.context();
    let (subscription, outcome) = registry.track_job_awaitable(started.track_request(context_id, context_name))?;
    Ok(FeatureHandle {
        started,
        subscription,
        outcome,
    })
}

pub async fn run_feature_job(
    client: &BackendClient,
    registry: &JobRegistry,
    job: &FeatureJob,
    mode: RunMode,
) -> Result<FeatureRun, JobError> {
    let handle = start_feature_job(client, registry, job).await?;
    match mode {
        RunMode::Foreground => Ok(FeatureRun::Finished(handle.wait().await?)),
        RunMode::Background => Ok(FeatureRun::Detached {
            job_id: handle.detach(),
        }),
    }
}
