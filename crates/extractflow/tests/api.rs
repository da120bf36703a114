mod common;

use std::sync::Arc;

use common::{DownTransport, Harness, MAX_PAYLOAD};
use extractflow::api::{router, ApiState};
use extractflow::auth::StaticTokenVerifier;
use extractflow::client::{ClientError, ExtractflowClient, StaticCredentials};
use extractflow::jobs::{InMemoryJobStore, JobStatus};
use extractflow::submission::SubmissionService;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(submissions: SubmissionService) -> Self {
        let app = router(ApiState {
            submissions,
            auth: Arc::new(StaticTokenVerifier::from_pairs(
                "alice=alice-token,bob=bob-token",
            )),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn client(&self, token: Option<&str>) -> ExtractflowClient {
        let creds = StaticCredentials::new(token.map(str::to_string));
        ExtractflowClient::new(self.base_url.clone(), Arc::new(creds))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn api_status(err: &ClientError) -> (StatusCode, String) {
    match err {
        ClientError::Api { status, body } => (*status, body.error.clone()),
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_then_read_status() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;
    let client = srv.client(None);

    let submitted = client.submit("hello world").await.unwrap();
    assert_eq!(submitted.status, JobStatus::Queued);
    assert_eq!(h.queue.published(), 1);

    let view = client.get_status(submitted.job_id).await.unwrap();
    assert_eq!(view.job_id, submitted.job_id);
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.retry_count, 0);
    assert!(view.result.is_none());
}

#[tokio::test]
async fn wire_format_uses_camel_case_keys() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let res = reqwest::Client::new()
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "text": "hello world" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let v: serde_json::Value = res.json().await.unwrap();
    assert!(v.get("jobId").is_some());
    assert_eq!(v["status"], "queued");
}

#[tokio::test]
async fn empty_text_is_400() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let err = srv.client(None).submit("").await.unwrap_err();
    assert_eq!(
        api_status(&err),
        (StatusCode::BAD_REQUEST, "validation_error".to_string())
    );
    assert_eq!(h.queue.published(), 0);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;
    let http = reqwest::Client::new();

    let res = http
        .post(format!("{}/jobs", srv.base_url))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = http
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "txt": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_text_is_413() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let err = srv
        .client(None)
        .submit(&"x".repeat(MAX_PAYLOAD + 1))
        .await
        .unwrap_err();
    assert_eq!(api_status(&err).0, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn body_over_the_transport_limit_is_413() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let res = reqwest::Client::new()
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "text": "x".repeat(3 * 1024 * 1024) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "payload_too_large");
    assert!(h.store.is_empty());
    assert_eq!(h.queue.published(), 0);
}

#[tokio::test]
async fn bad_token_is_401() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let err = srv.client(Some("wrong")).submit("hello").await.unwrap_err();
    assert_eq!(
        api_status(&err),
        (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
    );
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn other_users_job_is_404() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let submitted = srv
        .client(Some("alice-token"))
        .submit("hello")
        .await
        .unwrap();
    let id = submitted.job_id;

    srv.client(Some("alice-token")).get_status(id).await.unwrap();

    for client in [srv.client(Some("bob-token")), srv.client(None)] {
        let err = client.get_status(id).await.unwrap_err();
        assert_eq!(api_status(&err).0, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let err = srv
        .client(None)
        .get_status(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(
        api_status(&err),
        (StatusCode::NOT_FOUND, "not_found".to_string())
    );

    let res = reqwest::get(format!("{}/jobs/not-a-uuid", srv.base_url))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_outage_is_503() {
    let store = Arc::new(InMemoryJobStore::new());
    let submissions = SubmissionService::new(
        store.clone(),
        Arc::new(DownTransport::default()),
        MAX_PAYLOAD,
    );
    let srv = TestServer::spawn(submissions).await;

    let err = srv.client(None).submit("hello").await.unwrap_err();
    assert_eq!(
        api_status(&err),
        (StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable".to_string())
    );
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new();
    let srv = TestServer::spawn(h.submissions.clone()).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "ok");
}
