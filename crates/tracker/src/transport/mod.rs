// crates/tracker/src/transport/mod.rs
//! Transports that open a live progress stream for one progress key.
//!
//! - [`HttpTransport`]: Server-Sent Events over HTTP
//! - [`MemoryTransport`]: in-process streams, for tests and embedding

pub mod http;
pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TransportError;

pub use http::HttpTransport;
pub use memory::{MemoryStreamSender, MemoryTransport};

/// Raw event payloads from one progress stream, in delivery order.
///
/// The stream ends when the connection closes; an `Err` item means the
/// connection failed and no further items follow.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Opens progress streams. Injected into the registry so tests can substitute
/// an in-memory implementation.
#[async_trait]
pub trait ProgressTransport: Send + Sync + 'static {
    async fn connect(&self, progress_key: &str) -> Result<FrameStream, TransportError>;
}
