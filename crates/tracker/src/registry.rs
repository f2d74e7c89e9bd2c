// crates/tracker/src/registry.rs
//! Job registry: one live record and at most one progress channel per job.
//!
//! Any number of callers can track the same job. Each gets its own
//! [`Subscription`]; the registry opens a single channel, applies frames to the
//! shared record, and on the terminal frame hands every subscriber still
//! registered exactly one [`JobOutcome`].
//!
//! Subscriptions only govern observation. Disposing the last one does not
//! close the channel: the job keeps reporting until it ends, and the
//! [`Notifier`] still hears about the outcome.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use jobwatch_core::{FailureReason, JobOutcome, JobProgress, ProgressFrame};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEvent, ProgressChannel};
use crate::config::TrackerConfig;
use crate::error::{JobError, TrackError, TransportError};
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::subscription::{JobWatch, ReaderLease, Subscription};
use crate::transport::{HttpTransport, ProgressTransport};

/// What a caller needs to start tracking a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub job_id: String,
    pub progress_key: String,
    pub context_id: String,
    pub context_name: String,
}

impl TrackRequest {
    pub fn new(job_id: impl Into<String>, progress_key: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            progress_key: progress_key.into(),
            context_id: String::new(),
            context_name: String::new(),
        }
    }

    pub fn with_context(mut self, context_id: impl Into<String>, context_name: impl Into<String>) -> Self {
        self.context_id = context_id.into();
        self.context_name = context_name.into();
        self
    }

    fn validate(&self) -> Result<(), TrackError> {
        if self.job_id.trim().is_empty() {
            return Err(TrackError::EmptyJobId);
        }
        if self.progress_key.trim().is_empty() {
            return Err(TrackError::EmptyProgressKey);
        }
        Ok(())
    }
}

type OutcomeCallback = Box<dyn FnOnce(JobOutcome) + Send>;

struct JobEntry {
    /// Distinguishes this record from an earlier, evicted one with the same id.
    generation: u64,
    progress_tx: watch::Sender<JobProgress>,
    /// Interest set: subscribers still waiting for the outcome.
    interest: Vec<(u64, OutcomeCallback)>,
    /// Live subscription handles and watches.
    readers: usize,
    /// Set once, on the terminal frame.
    outcome: Option<JobOutcome>,
    channel: Option<ProgressChannel>,
}

pub(crate) struct RegistryInner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    transport: Arc<dyn ProgressTransport>,
    notifier: Arc<dyn Notifier>,
    config: TrackerConfig,
    next_id: AtomicU64,
}

/// Process-wide table of tracked jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    pub fn new(
        transport: Arc<dyn ProgressTransport>,
        notifier: Arc<dyn Notifier>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: Mutex::new(HashMap::new()),
                transport,
                notifier,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registry backed by SSE over HTTP.
    pub fn http(config: TrackerConfig, notifier: Arc<dyn Notifier>) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(Arc::new(transport), notifier, config))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Start observing a job.
    ///
    /// Opens a progress channel unless one already exists for `job_id`, and
    /// always returns a fresh [`Subscription`]. `on_outcome` runs exactly once
    /// when the job ends, unless the subscription is disposed first. If the
    /// job already ended and its record is still retained, `on_outcome` runs
    /// before this returns.
    ///
    /// Callbacks run on the channel task. A panic in one is logged and does
    /// not stop the others from running.
    pub fn track_job<F>(&self, request: TrackRequest, on_outcome: F) -> Result<Subscription, TrackError>
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        request.validate()?;
        let runtime = Handle::try_current().map_err(|_| TrackError::NoRuntime)?;
        let subscriber_id = self.inner.next_id();
        let mut callback: Option<OutcomeCallback> = Some(Box::new(on_outcome));

        let (generation, progress_rx, retained, started) = {
            let mut jobs = self.inner.lock_jobs();
            let mut started = None;
            let entry = match jobs.entry(request.job_id.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    let entry = self.create_entry(&runtime, &request);
                    started = Some(entry.progress_tx.borrow().clone());
                    slot.insert(entry)
                }
            };
            entry.readers += 1;
            let retained = entry.outcome.clone();
            if retained.is_none() {
                if let Some(callback) = callback.take() {
                    entry.interest.push((subscriber_id, callback));
                }
            }
            (entry.generation, entry.progress_tx.subscribe(), retained, started)
        };

        if let Some(progress) = &started {
            metrics::job_tracked();
            info!(
                job_id = %request.job_id,
                progress_key = %request.progress_key,
                context = %request.context_name,
                "tracking job"
            );
            self.inner.notifier.notify(&Notification::started(progress));
        }
        metrics::subscription_created();

        let subscription = Subscription::new(
            ReaderLease::new(Arc::clone(&self.inner), request.job_id.clone(), generation),
            subscriber_id,
            progress_rx,
        );

        if let (Some(outcome), Some(callback)) = (retained, callback) {
            debug!(job_id = %request.job_id, "job already finished; delivering retained outcome");
            callback(outcome);
        }
        Ok(subscription)
    }

    /// [`track_job`](Self::track_job) with the outcome delivered through a
    /// oneshot channel.
    pub fn track_job_awaitable(
        &self,
        request: TrackRequest,
    ) -> Result<(Subscription, oneshot::Receiver<JobOutcome>), TrackError> {
        let (tx, rx) = oneshot::channel();
        let subscription = self.track_job(request, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        Ok((subscription, rx))
    }

    /// Track a job and wait for it to end.
    pub async fn track_job_until_done(&self, request: TrackRequest) -> Result<JobProgress, JobError> {
        let (_subscription, rx) = self.track_job_awaitable(request)?;
        let outcome = rx.await.map_err(|_| JobError::Abandoned)?;
        Ok(outcome.into_result()?)
    }

    /// Snapshot of the live record, or `None` if this client does not know
    /// the job (never tracked here, or already evicted).
    pub fn get_job(&self, job_id: &str) -> Option<JobProgress> {
        let jobs = self.inner.lock_jobs();
        jobs.get(job_id).map(|entry| entry.progress_tx.borrow().clone())
    }

    /// Observe a job's record as it changes. The watch keeps a finished
    /// record readable until it is dropped.
    pub fn watch_job(&self, job_id: &str) -> Option<JobWatch> {
        let (generation, rx) = {
            let mut jobs = self.inner.lock_jobs();
            let entry = jobs.get_mut(job_id)?;
            entry.readers += 1;
            (entry.generation, entry.progress_tx.subscribe())
        };
        Some(JobWatch::new(
            ReaderLease::new(Arc::clone(&self.inner), job_id.to_string(), generation),
            rx,
        ))
    }

    /// Snapshots of every tracked job, oldest first.
    pub fn tracked_jobs(&self) -> Vec<JobProgress> {
        let mut jobs: Vec<JobProgress> = self
            .inner
            .lock_jobs()
            .values()
            .map(|entry| entry.progress_tx.borrow().clone())
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    /// Number of progress channels currently connecting or open.
    pub fn open_channels(&self) -> usize {
        self.inner
            .lock_jobs()
            .values()
            .filter(|entry| entry.channel.as_ref().is_some_and(|c| c.is_live()))
            .count()
    }

    /// Size of a job's interest set.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .lock_jobs()
            .get(job_id)
            .map_or(0, |entry| entry.interest.len())
    }

    fn create_entry(&self, runtime: &Handle, request: &TrackRequest) -> JobEntry {
        let generation = self.inner.next_id();
        let progress = JobProgress::new(
            request.job_id.clone(),
            request.progress_key.clone(),
            request.context_id.clone(),
            request.context_name.clone(),
            Utc::now(),
        );
        let (progress_tx, _) = watch::channel(progress);

        let registry = Arc::downgrade(&self.inner);
        let job_id = request.job_id.clone();
        let channel = ProgressChannel::open(
            runtime,
            Arc::clone(&self.inner.transport),
            request.progress_key.clone(),
            self.inner.config.idle_timeout,
            move |event| {
                if let Some(registry) = registry.upgrade() {
                    registry.on_channel_event(&job_id, generation, event);
                }
            },
        );

        JobEntry {
            generation,
            progress_tx,
            interest: Vec::new(),
            readers: 0,
            outcome: None,
            channel: Some(channel),
        }
    }
}

impl RegistryInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::error!("job registry mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn on_channel_event(&self, job_id: &str, generation: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => debug!(%job_id, "progress channel open"),
            ChannelEvent::Frame(frame) => self.apply_frame(job_id, generation, &frame),
            ChannelEvent::Errored(error) => self.connection_lost(job_id, generation, error),
        }
    }

    fn apply_frame(&self, job_id: &str, generation: u64, frame: &ProgressFrame) {
        let (progress, outcome, interest, _evicted) = {
            let mut jobs = self.lock_jobs();
            let Some(entry) = jobs.get_mut(job_id).filter(|e| e.generation == generation) else {
                return;
            };

            let mut entered_terminal = false;
            entry
                .progress_tx
                .send_modify(|progress| entered_terminal = progress.apply(frame, Utc::now()));
            if !entered_terminal {
                return;
            }

            let progress = entry.progress_tx.borrow().clone();
            let Some(outcome) = JobOutcome::from_terminal(&progress) else {
                return;
            };
            entry.outcome = Some(outcome.clone());
            let interest = std::mem::take(&mut entry.interest);
            let evicted = if entry.readers == 0 {
                jobs.remove(job_id)
            } else {
                None
            };
            (progress, outcome, interest, evicted)
        };
        self.dispatch(&progress, outcome, interest);
    }

    fn connection_lost(&self, job_id: &str, generation: u64, error: TransportError) {
        let (progress, interest, _evicted) = {
            let mut jobs = self.lock_jobs();
            match jobs.get(job_id) {
                Some(entry) if entry.generation == generation && entry.outcome.is_none() => {}
                _ => return,
            }
            let Some(mut entry) = jobs.remove(job_id) else {
                return;
            };
            let progress = entry.progress_tx.borrow().clone();
            let interest = std::mem::take(&mut entry.interest);
            (progress, interest, entry)
        };

        warn!(%job_id, error = %error, "lost progress stream; evicting job");
        let outcome = JobOutcome::Failed(FailureReason::ConnectionLost {
            detail: error.to_string(),
        });
        self.dispatch(&progress, outcome, interest);
    }

    /// Runs outside the lock so callbacks may call back into the registry.
    fn dispatch(&self, progress: &JobProgress, outcome: JobOutcome, interest: Vec<(u64, OutcomeCallback)>) {
        let label = match &outcome {
            JobOutcome::Completed(_) => "completed",
            JobOutcome::Failed(reason) if reason.is_connection_lost() => "connection_lost",
            JobOutcome::Failed(_) => "failed",
        };
        metrics::job_outcome(label);
        info!(
            job_id = %progress.job_id,
            outcome = label,
            subscribers = interest.len(),
            "job finished"
        );

        self.notifier.notify(&Notification::finished(progress, &outcome));
        for (subscriber_id, callback) in interest {
            let outcome = outcome.clone();
            // A panicking callback must not cost later subscribers their outcome.
            if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
                error!(job_id = %progress.job_id, subscriber_id, "outcome callback panicked");
            }
        }
    }

    /// Drop one subscriber from the interest set. Returns `false` if it was
    /// no longer there (already notified, or the record is gone).
    pub(crate) fn dispose_subscriber(&self, job_id: &str, generation: u64, subscriber_id: u64) -> bool {
        let removed = {
            let mut jobs = self.lock_jobs();
            let Some(entry) = jobs.get_mut(job_id).filter(|e| e.generation == generation) else {
                return false;
            };
            let removed = entry
                .interest
                .iter()
                .position(|(id, _)| *id == subscriber_id)
                .map(|index| entry.interest.remove(index));
            if removed.is_some() && entry.interest.is_empty() && entry.outcome.is_none() {
                debug!(%job_id, "last subscriber disposed; job continues in background");
            }
            removed
        };
        removed.is_some()
    }

    /// Release one reader; evicts a finished record once nobody reads it.
    pub(crate) fn release_reader(&self, job_id: &str, generation: u64) {
        let evicted = {
            let mut jobs = self.lock_jobs();
            let Some(entry) = jobs.get_mut(job_id).filter(|e| e.generation == generation) else {
                return;
            };
            entry.readers = entry.readers.saturating_sub(1);
            if entry.readers == 0 && entry.outcome.is_some() {
                jobs.remove(job_id)
            } else {
                None
            }
        };
        if evicted.is_some() {
            debug!(%job_id, "evicted finished job after last reader released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, NoopNotifier, NotificationKind};
    use crate::transport::MemoryTransport;
    use jobwatch_core::JobStatus;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn registry(transport: &MemoryTransport) -> JobRegistry {
        JobRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(NoopNotifier),
            TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_track_rejects_empty_ids() {
        let registry = registry(&MemoryTransport::new());
        let err = registry.track_job(TrackRequest::new("", "k"), |_| {}).err();
        assert_eq!(err, Some(TrackError::EmptyJobId));
        let err = registry.track_job(TrackRequest::new("j", " "), |_| {}).err();
        assert_eq!(err, Some(TrackError::EmptyProgressKey));
        assert!(registry.tracked_jobs().is_empty());
    }

    #[test]
    fn test_track_outside_runtime() {
        let registry = registry(&MemoryTransport::new());
        let err = registry.track_job(TrackRequest::new("j", "k"), |_| {}).err();
        assert_eq!(err, Some(TrackError::NoRuntime));
    }

    #[tokio::test]
    async fn test_get_job_unknown_is_none() {
        let registry = registry(&MemoryTransport::new());
        assert!(registry.get_job("nope").is_none());
        assert!(registry.watch_job("nope").is_none());
    }

    #[tokio::test]
    async fn test_new_record_starts_queued() {
        let transport = MemoryTransport::new();
        let _sender = transport.stream("k1");
        let registry = registry(&transport);

        let sub = registry
            .track_job(TrackRequest::new("j1", "k1").with_context("p1", "Alice"), |_| {})
            .unwrap();
        let job = registry.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.context_name, "Alice");
        assert_eq!(sub.progress(), job);
        assert_eq!(registry.subscriber_count("j1"), 1);
    }

    #[tokio::test]
    async fn test_record_retained_while_read_then_evicted() {
        let transport = MemoryTransport::new();
        let sender = transport.stream("k1");
        let registry = registry(&transport);

        let (sub, rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();
        sender.send_frame(&ProgressFrame::completed(json!({"n": 1})));
        rx.await.unwrap();

        assert_eq!(registry.get_job("j1").unwrap().status, JobStatus::Completed);
        assert_eq!(registry.subscriber_count("j1"), 0);

        drop(sub);
        assert!(registry.get_job("j1").is_none());
    }

    #[tokio::test]
    async fn test_watch_keeps_finished_record_readable() {
        let transport = MemoryTransport::new();
        let sender = transport.stream("k1");
        let registry = registry(&transport);

        let sub = registry.track_job(TrackRequest::new("j1", "k1"), |_| {}).unwrap();
        let mut watch = registry.watch_job("j1").unwrap();
        drop(sub);

        sender.send_frame(&ProgressFrame::completed(json!({})));
        while watch.current().status != JobStatus::Completed {
            assert!(watch.changed().await);
        }

        assert_eq!(registry.get_job("j1").unwrap().status, JobStatus::Completed);
        drop(watch);
        assert!(registry.get_job("j1").is_none());
    }

    #[tokio::test]
    async fn test_background_job_evicted_when_it_finishes() {
        let transport = MemoryTransport::new();
        let sender = transport.stream("k1");
        let (notifier, mut notifications) = ChannelNotifier::new();
        let registry = JobRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(notifier),
            TrackerConfig::default(),
        );

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let sub = registry
            .track_job(TrackRequest::new("j1", "k1"), move |_| flag.store(true, Ordering::SeqCst))
            .unwrap();
        sub.dispose();
        drop(sub);
        assert!(registry.get_job("j1").is_some());

        sender.send_frame(&ProgressFrame::completed(json!({})));
        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Started);
        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Succeeded);

        assert!(!fired.load(Ordering::SeqCst));
        assert!(registry.get_job("j1").is_none());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_starve_others() {
        let transport = MemoryTransport::new();
        let sender = transport.stream("k1");
        let registry = registry(&transport);

        let _first = registry
            .track_job(TrackRequest::new("j1", "k1"), |_| panic!("view already torn down"))
            .unwrap();
        let (_second, rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();

        sender.send_frame(&ProgressFrame::completed(json!({"n": 3})));
        assert!(rx.await.unwrap().is_success());
        assert_eq!(registry.get_job("j1").unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_retained_outcome() {
        let transport = MemoryTransport::new();
        let sender = transport.stream("k1");
        let registry = registry(&transport);

        let (_first, rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();
        sender.send_frame(&ProgressFrame::completed(json!({"n": 2})));
        rx.await.unwrap();

        let (_second, rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();
        let outcome = rx.await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(transport.connect_count("k1"), 1);
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_touch_new_record() {
        let transport = MemoryTransport::new();
        transport.stream("k1").close();
        let registry = registry(&transport);

        let (old, rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();
        assert!(!rx.await.unwrap().is_success());
        assert!(registry.get_job("j1").is_none());

        let _sender = transport.stream("k1");
        let (_new, _rx) = registry.track_job_awaitable(TrackRequest::new("j1", "k1")).unwrap();
        old.dispose();
        drop(old);

        assert_eq!(registry.subscriber_count("j1"), 1);
        assert!(registry.get_job("j1").is_some());
    }
}
