// crates/tracker/src/api.rs
//! HTTP client for the start-job endpoints.
//!
//! - POST /api/v1/face-suggestions/persons/{id}/find-more: find more suggestions
//! - POST /api/v1/faces/detection-sessions: run face detection over a directory
//! - POST /api/v1/faces/persons/{id}/centroids: compute match centroids
//! - GET  /api/v1/jobs/{id}: one-shot status read (fallback to the stream)

use jobwatch_core::ProgressFrame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::TrackerConfig;
use crate::error::ApiError;
use crate::registry::TrackRequest;

/// Response of every start-job endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    #[serde(alias = "job_id")]
    pub job_id: String,
    #[serde(alias = "progress_key")]
    pub progress_key: String,
    /// Feature-specific echo fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StartedJob {
    pub fn track_request(&self, context_id: impl Into<String>, context_name: impl Into<String>) -> TrackRequest {
        TrackRequest::new(self.job_id.clone(), self.progress_key.clone()).with_context(context_id, context_name)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindMoreBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FaceDetectionBody<'a> {
    directory: &'a str,
    recursive: bool,
}

/// Client for the backend's job-starting endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    config: TrackerConfig,
}

impl BackendClient {
    pub fn new(config: TrackerConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: reqwest::Client, config: TrackerConfig) -> Self {
        Self { client, config }
    }

    pub async fn start_find_more(&self, person_id: &str, limit: Option<u32>) -> Result<StartedJob, ApiError> {
        let path = format!(
            "/api/v1/face-suggestions/persons/{}/find-more",
            urlencoding::encode(person_id)
        );
        self.post(&path, &FindMoreBody { limit }).await
    }

    pub async fn start_face_detection(&self, directory: &str, recursive: bool) -> Result<StartedJob, ApiError> {
        self.post(
            "/api/v1/faces/detection-sessions",
            &FaceDetectionBody { directory, recursive },
        )
        .await
    }

    pub async fn start_centroid_computation(&self, person_id: &str) -> Result<StartedJob, ApiError> {
        let path = format!("/api/v1/faces/persons/{}/centroids", urlencoding::encode(person_id));
        self.post(&path, &serde_json::json!({})).await
    }

    /// Read a job's current state once, as a frame to merge into a record.
    pub async fn fetch_job(&self, job_id: &str) -> Result<ProgressFrame, ApiError> {
        let url = self.config.url(&format!("/api/v1/jobs/{}", urlencoding::encode(job_id)));
        debug!(%url, "fetching job status");
        let response = self.client.get(&url).send().await?;
        decode(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<StartedJob, ApiError> {
        let url = self.config.url(path);
        debug!(%url, "starting job");
        let response = self.client.post(&url).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}
