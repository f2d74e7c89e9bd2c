// crates/tracker/src/notify.rs
//! Notification bridge: tells the user about job transitions even when no
//! view is observing the job any more.

use jobwatch_core::{JobOutcome, JobProgress};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Started,
    Succeeded,
    Failed,
}

/// Wire value of a terminal notice's `outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Success,
    Failure,
}

/// One toast-worthy event. Emitted once per job per kind.
///
/// Terminal notices serialize as
/// `{ contextName, outcome: "success" | "failure", summary, .. }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub job_id: String,
    /// Entity the job works on; lets a toast layer collapse duplicates.
    pub context_id: String,
    pub context_name: String,
    pub kind: NotificationKind,
    /// Set on terminal notices only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<NotificationOutcome>,
    pub summary: String,
}

impl Notification {
    pub fn started(progress: &JobProgress) -> Self {
        Self {
            job_id: progress.job_id.clone(),
            context_id: progress.context_id.clone(),
            context_name: progress.context_name.clone(),
            kind: NotificationKind::Started,
            outcome: None,
            summary: "Job started".to_string(),
        }
    }

    /// `progress` is the last known record; for a lost connection it is the
    /// record as it was when the stream dropped.
    pub fn finished(progress: &JobProgress, outcome: &JobOutcome) -> Self {
        let (kind, wire, summary) = match outcome {
            JobOutcome::Completed(done) => (
                NotificationKind::Succeeded,
                NotificationOutcome::Success,
                done.message.clone().unwrap_or_else(|| "Completed".to_string()),
            ),
            JobOutcome::Failed(reason) => (
                NotificationKind::Failed,
                NotificationOutcome::Failure,
                reason.message(),
            ),
        };
        Self {
            job_id: progress.job_id.clone(),
            context_id: progress.context_id.clone(),
            context_name: progress.context_name.clone(),
            kind,
            outcome: Some(wire),
            summary,
        }
    }
}

/// Receives job transitions. Called outside the registry lock, from whichever
/// task observed the transition.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: &Notification);
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) {}
}

/// Writes one structured log line per notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: &Notification) {
        match n.kind {
            NotificationKind::Failed => tracing::warn!(
                job_id = %n.job_id,
                context = %n.context_name,
                summary = %n.summary,
                "job failed"
            ),
            NotificationKind::Succeeded => tracing::info!(
                job_id = %n.job_id,
                context = %n.context_name,
                summary = %n.summary,
                "job completed"
            ),
            NotificationKind::Started => tracing::info!(
                job_id = %n.job_id,
                context = %n.context_name,
                "job started"
            ),
        }
    }
}

/// Forwards notifications to a channel, e.g. a toast renderer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: &Notification) {
        // Ignore send errors (nobody rendering toasts is fine).
        let _ = self.tx.send(notification.clone());
    }
}
