// crates/tracker/src/transport/memory.rs
//! In-process progress streams.
//!
//! The producing side calls [`MemoryTransport::stream`] to obtain a sender for
//! a progress key before (or after) the registry tracks the job; frames sent
//! before the channel connects are buffered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use jobwatch_core::ProgressFrame;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{FrameStream, ProgressTransport};
use crate::error::TransportError;

type Item = Result<String, TransportError>;

#[derive(Default)]
struct MemoryInner {
    pending: HashMap<String, mpsc::UnboundedReceiver<Item>>,
    connects: HashMap<String, usize>,
}

/// Transport backed by unbounded in-memory channels, one per progress key.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream for `progress_key`, replacing any stream not yet
    /// connected, and return its producing side.
    pub fn stream(&self, progress_key: impl Into<String>) -> MemoryStreamSender {
        let progress_key = progress_key.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().pending.insert(progress_key.clone(), rx);
        MemoryStreamSender { progress_key, tx }
    }

    /// Number of times a channel connected to `progress_key`.
    pub fn connect_count(&self, progress_key: &str) -> usize {
        self.lock().connects.get(progress_key).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.lock().connects.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProgressTransport for MemoryTransport {
    async fn connect(&self, progress_key: &str) -> Result<FrameStream, TransportError> {
        let mut inner = self.lock();
        *inner.connects.entry(progress_key.to_string()).or_default() += 1;
        let rx = inner
            .pending
            .remove(progress_key)
            .ok_or_else(|| TransportError::UnknownKey(progress_key.to_string()))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Producing side of one in-memory progress stream.
///
/// Dropping it ends the stream.
pub struct MemoryStreamSender {
    progress_key: String,
    tx: mpsc::UnboundedSender<Item>,
}

impl MemoryStreamSender {
    pub fn progress_key(&self) -> &str {
        &self.progress_key
    }

    /// Send a frame as JSON. Returns `false` once the channel stopped listening.
    pub fn send_frame(&self, frame: &ProgressFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send_raw(json),
            Err(e) => {
                tracing::error!(progress_key = %self.progress_key, "failed to encode frame: {e}");
                false
            }
        }
    }

    /// Send an arbitrary event payload.
    pub fn send_raw(&self, data: impl Into<String>) -> bool {
        self.tx.send(Ok(data.into())).is_ok()
    }

    /// Fail the connection; the stream yields this error and then ends.
    pub fn fail(self, error: TransportError) {
        let _ = self.tx.send(Err(error));
    }

    /// End the stream without a terminal frame.
    pub fn close(self) {}

    /// `true` once the receiving channel has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
