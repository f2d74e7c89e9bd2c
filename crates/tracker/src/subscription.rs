// crates/tracker/src/subscription.rs
//! Per-caller handles onto a tracked job.
//!
//! A [`Subscription`] ties one caller's interest to a job without tying the
//! job to the caller: disposing it drops the caller's callback, not the job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jobwatch_core::{JobProgress, JobStatus};
use tokio::sync::watch;

use crate::registry::RegistryInner;

/// Keeps a job's record readable. A finished record is evicted when its last
/// lease is released.
pub(crate) struct ReaderLease {
    registry: Arc<RegistryInner>,
    job_id: String,
    generation: u64,
    released: AtomicBool,
}

impl ReaderLease {
    pub(crate) fn new(registry: Arc<RegistryInner>, job_id: String, generation: u64) -> Self {
        Self {
            registry,
            job_id,
            generation,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release_reader(&self.job_id, self.generation);
        }
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// One caller's interest in a job, returned by
/// [`JobRegistry::track_job`](crate::JobRegistry::track_job).
///
/// - [`dispose`](Self::dispose) stops this caller's callback from firing and
///   lets the job continue in the background.
/// - Dropping without disposing only stops reading: the callback stays
///   registered, like a detached task.
pub struct Subscription {
    lease: ReaderLease,
    subscriber_id: u64,
    progress: watch::Receiver<JobProgress>,
    disposed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(lease: ReaderLease, subscriber_id: u64, progress: watch::Receiver<JobProgress>) -> Self {
        Self {
            lease,
            subscriber_id,
            progress,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.lease.job_id
    }

    /// Latest known record. Stays readable after the job ends, even once the
    /// registry has evicted it.
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.progress.borrow().status
    }

    /// Wait for the next update. Returns `false` once the registry has
    /// evicted the record and no further updates can arrive.
    pub async fn changed(&mut self) -> bool {
        self.progress.changed().await.is_ok()
    }

    /// Extra receiver for the same record, e.g. for a second view.
    pub fn watch(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Stop observing. Idempotent; a no-op once the outcome was delivered.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lease
            .registry
            .dispose_subscriber(&self.lease.job_id, self.lease.generation, self.subscriber_id);
        self.lease.release();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.lease.job_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Read-only view of a job's record as it changes.
pub struct JobWatch {
    lease: ReaderLease,
    rx: watch::Receiver<JobProgress>,
}

impl JobWatch {
    pub(crate) fn new(lease: ReaderLease, rx: watch::Receiver<JobProgress>) -> Self {
        Self { lease, rx }
    }

    pub fn job_id(&self) -> &str {
        &self.lease.job_id
    }

    pub fn current(&self) -> JobProgress {
        self.rx.borrow().clone()
    }

    /// Wait for the next update; `false` once the record is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
