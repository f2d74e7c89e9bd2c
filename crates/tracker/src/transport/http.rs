// crates/tracker/src/transport/http.rs
//! SSE progress streams over HTTP.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use super::{FrameStream, ProgressTransport};
use crate::config::TrackerConfig;
use crate::error::TransportError;
use crate::sse::SseDecoder;

/// Connects to `{base_url}{progress_path}` and yields the `data` of each
/// server-sent event.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TrackerConfig,
}

impl HttpTransport {
    pub fn new(config: TrackerConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect {
                url: config.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: reqwest::Client, config: TrackerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ProgressTransport for HttpTransport {
    async fn connect(&self, progress_key: &str) -> Result<FrameStream, TransportError> {
        let url = self.config.progress_url(progress_key);
        debug!(%url, "opening progress stream");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for event in decoder.feed(&chunk) {
                            yield Ok(event.data);
                        }
                    }
                    Err(e) => {
                        yield Err(TransportError::Read(e.to_string()));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
