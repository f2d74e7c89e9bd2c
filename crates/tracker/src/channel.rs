// crates/tracker/src/channel.rs
//! Progress channel client: owns one live connection for one progress key.
//!
//! States: `connecting → open → closed` on a terminal frame, or `errored`
//! when the connection fails or ends early. There is no reconnection; the
//! owner decides how to surface an error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use jobwatch_core::ProgressFrame;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::metrics;
use crate::transport::ProgressTransport;

/// Connection state of a [`ProgressChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// Closed by the channel itself after a terminal frame.
    Closed,
    Errored(TransportError),
}

impl ChannelState {
    /// `true` while the connection is being opened or is open.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Events a channel reports to its owner, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Frame(ProgressFrame),
    /// The connection failed before a terminal frame. Always the last event.
    Errored(TransportError),
}

/// Handle to the background task driving one progress stream.
///
/// Dropping the handle aborts the task.
pub struct ProgressChannel {
    progress_key: String,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl ProgressChannel {
    /// Spawn the channel task on `runtime`. `on_event` runs on that task, once
    /// per event, in stream order.
    pub fn open<F>(
        runtime: &Handle,
        transport: Arc<dyn ProgressTransport>,
        progress_key: impl Into<String>,
        idle_timeout: Option<Duration>,
        on_event: F,
    ) -> Self
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let progress_key = progress_key.into();
        let (state_tx, state) = watch::channel(ChannelState::Connecting);
        let task = runtime.spawn(run(
            transport,
            progress_key.clone(),
            idle_timeout,
            state_tx,
            on_event,
        ));
        Self {
            progress_key,
            state,
            task,
        }
    }

    pub fn progress_key(&self) -> &str {
        &self.progress_key
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        self.state.borrow().is_live()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps the open-channel gauge balanced on every exit path, abort included.
struct OpenGauge;

impl OpenGauge {
    fn new() -> Self {
        metrics::channel_opened();
        Self
    }
}

impl Drop for OpenGauge {
    fn drop(&mut self) {
        metrics::channel_closed();
    }
}

async fn run<F>(
    transport: Arc<dyn ProgressTransport>,
    progress_key: String,
    idle_timeout: Option<Duration>,
    state_tx: watch::Sender<ChannelState>,
    mut on_event: F,
) where
    F: FnMut(ChannelEvent) + Send + 'static,
{
    let _gauge = OpenGauge::new();

    let mut stream = match transport.connect(&progress_key).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%progress_key, error = %e, "progress channel failed to connect");
            state_tx.send_replace(ChannelState::Errored(e.clone()));
            on_event(ChannelEvent::Errored(e));
            return;
        }
    };

    state_tx.send_replace(ChannelState::Open);
    debug!(%progress_key, "progress channel open");
    on_event(ChannelEvent::Opened);

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(TransportError::IdleTimeout(limit))),
            },
            None => stream.next().await,
        };

        let data = match next {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                drop(stream);
                warn!(%progress_key, error = %e, "progress channel errored");
                state_tx.send_replace(ChannelState::Errored(e.clone()));
                on_event(ChannelEvent::Errored(e));
                return;
            }
            None => {
                drop(stream);
                let e = TransportError::StreamEnded;
                warn!(%progress_key, "progress stream ended before a terminal frame");
                state_tx.send_replace(ChannelState::Errored(e.clone()));
                on_event(ChannelEvent::Errored(e));
                return;
            }
        };

        let frame = match ProgressFrame::parse(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%progress_key, error = %e, "skipping undecodable progress frame");
                continue;
            }
        };

        if frame.is_terminal() {
            // Stop listening before handing over the terminal frame.
            drop(stream);
            state_tx.send_replace(ChannelState::Closed);
            debug!(%progress_key, "progress channel closed after terminal frame");
            on_event(ChannelEvent::Frame(frame));
            return;
        }
        on_event(ChannelEvent::Frame(frame));
    }
}
