// crates/tracker/tests/http_transport.rs
//! HTTP transport and start-job client against a mock backend.

use std::sync::Arc;

use jobwatch_tracker::{
    run_feature_job, ApiError, BackendClient, FeatureJob, FeatureRun, HttpTransport, JobError,
    JobOutcome, JobRegistry, JobStatus, MemoryTransport, NoopNotifier, ProgressFrame,
    ProgressTransport, RunMode, TrackRequest, TrackerConfig, TransportError,
};
use futures_util::StreamExt;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::json;

const SSE_COMPLETE: &str = ": keep-alive\n\n\
data: {\"status\":\"running\",\"current\":3,\"total\":10}\n\n\
data: {\"current\":7}\n\n\
event: progress\r\ndata: {\"status\":\"completed\",\"result\":{\"n\":5}}\r\n\r\n";

fn config(server: &mockito::ServerGuard) -> TrackerConfig {
    TrackerConfig::default().with_base_url(server.url())
}

#[tokio::test]
async fn sse_stream_yields_event_payloads() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/jobs/pk-1/progress")
        .match_header("accept", "text/event-stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_COMPLETE)
        .create_async()
        .await;

    let transport = HttpTransport::new(config(&server)).unwrap();
    let stream = transport.connect("pk-1").await.unwrap();
    let payloads: Vec<String> = stream.map(|item| item.unwrap()).collect().await;

    assert_eq!(payloads.len(), 3);
    let last = ProgressFrame::parse(&payloads[2]).unwrap();
    assert_eq!(last.status, Some(JobStatus::Completed));
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_a_connect_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v1/jobs/pk-missing/progress")
        .with_status(404)
        .create_async()
        .await;

    let transport = HttpTransport::new(config(&server)).unwrap();
    let err = transport.connect("pk-missing").await.err();
    match err {
        Some(TransportError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn registry_over_http_completes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v1/jobs/pk-1/progress")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_COMPLETE)
        .create_async()
        .await;

    let registry = JobRegistry::http(config(&server), Arc::new(NoopNotifier)).unwrap();
    let done = registry
        .track_job_until_done(TrackRequest::new("j1", "pk-1"))
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.current, 7);
    assert_eq!(done.result, Some(json!({"n": 5})));
}

#[tokio::test]
async fn stream_ending_early_is_a_lost_connection() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v1/jobs/pk-2/progress")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: {\"status\":\"running\",\"current\":1,\"total\":4}\n\n")
        .create_async()
        .await;

    let registry = JobRegistry::http(config(&server), Arc::new(NoopNotifier)).unwrap();
    let (_sub, rx) = registry.track_job_awaitable(TrackRequest::new("j2", "pk-2")).unwrap();

    match rx.await.unwrap() {
        JobOutcome::Failed(reason) => assert!(reason.is_connection_lost()),
        other => panic!("expected lost connection, got {other:?}"),
    }
    assert!(registry.get_job("j2").is_none());
}

#[tokio::test]
async fn start_find_more_posts_limit() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/face-suggestions/persons/p7/find-more")
        .match_body(Matcher::Json(json!({"limit": 25})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jobId":"j9","progressKey":"pk-9","personId":"p7"}"#)
        .create_async()
        .await;

    let client = BackendClient::new(config(&server)).unwrap();
    let started = client.start_find_more("p7", Some(25)).await.unwrap();

    assert_eq!(started.job_id, "j9");
    assert_eq!(started.progress_key, "pk-9");
    assert_eq!(started.extra.get("personId"), Some(&json!("p7")));
    mock.assert_async().await;
}

#[tokio::test]
async fn start_error_carries_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v1/faces/detection-sessions")
        .with_status(409)
        .with_body("detection already running")
        .create_async()
        .await;

    let client = BackendClient::new(config(&server)).unwrap();
    match client.start_face_detection("/photos", true).await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 409);
            assert_eq!(body, "detection already running");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_job_reads_current_state() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v1/jobs/j5")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"failed","current":2,"total":8,"error_message":"disk full"}"#)
        .create_async()
        .await;

    let client = BackendClient::new(config(&server)).unwrap();
    let frame = client.fetch_job("j5").await.unwrap();
    assert_eq!(frame.status, Some(JobStatus::Failed));
    assert_eq!(frame.error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn centroid_flow_foreground_and_background() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v1/faces/persons/p1/centroids")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jobId":"c1","progressKey":"pk-c1"}"#)
        .expect(2)
        .create_async()
        .await;

    let transport = MemoryTransport::new();
    let registry = JobRegistry::new(
        Arc::new(transport.clone()),
        Arc::new(NoopNotifier),
        config(&server),
    );
    let client = BackendClient::new(config(&server)).unwrap();
    let job = FeatureJob::Centroids {
        person_id: "p1".into(),
        person_name: "Alice".into(),
    };

    let sender = transport.stream("pk-c1");
    sender.send_frame(&ProgressFrame::failed("no faces assigned"));
    let err = run_feature_job(&client, &registry, &job, RunMode::Foreground)
        .await
        .unwrap_err();
    match err {
        JobError::Failed(reason) => assert_eq!(reason.message(), "no faces assigned"),
        other => panic!("expected job failure, got {other:?}"),
    }

    let sender = transport.stream("pk-c1");
    let run = run_feature_job(&client, &registry, &job, RunMode::Background)
        .await
        .unwrap();
    assert_eq!(run, FeatureRun::Detached { job_id: "c1".into() });
    assert_eq!(registry.subscriber_count("c1"), 0);
    assert_eq!(registry.get_job("c1").unwrap().context_name, "Alice");
    drop(sender);
}
