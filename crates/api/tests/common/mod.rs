#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use imgpipe_core::manifest::ManifestColumns;
use imgpipe_db::InMemoryStatusRepo;
use imgpipe_events::EventBus;
use imgpipe_pipeline::publish::LocalPublisher;
use imgpipe_pipeline::transform::{ImageError, ImageTransform};
use imgpipe_pipeline::JobOrchestrator;
use tempfile::TempDir;
use tower::ServiceExt;

use imgpipe_api::config::{ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use imgpipe_api::router::build_app_router;
use imgpipe_api::state::AppState;

pub const BOUNDARY: &str = "imgpipe-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
    }
}

/// Publishes nothing; reports `stub://{key}` for every image.
struct StubTransform;

#[async_trait]
impl ImageTransform for StubTransform {
    async fn transform(&self, _source: &str, key: &str) -> Result<String, ImageError> {
        Ok(format!("stub://{key}"))
    }
}

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<JobOrchestrator>,
    /// Keeps the publication root alive for the test's duration.
    pub output_dir: TempDir,
}

impl TestApp {
    /// Wait for every submitted job to reach a terminal status.
    pub async fn drain(&self) {
        assert!(self.orchestrator.shutdown(Duration::from_secs(30)).await);
    }
}

/// Build the full application router over an in-memory pipeline.
///
/// Uses the same [`build_app_router`] as production so integration tests
/// exercise the full middleware stack.
pub fn build_test_app() -> TestApp {
    let output_dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::new(InMemoryStatusRepo::new()),
        Arc::new(EventBus::default()),
        Arc::new(StubTransform),
        Arc::new(LocalPublisher::new(output_dir.path(), None)),
        ManifestColumns::default(),
        4,
    ));

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };

    TestApp {
        router: build_app_router(state, &test_config()),
        orchestrator,
        output_dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// POST a multipart form with one field named `field` holding `content`.
pub async fn post_multipart(
    app: &TestApp,
    uri: &str,
    field: &str,
    content: &[u8],
) -> Response<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"manifest.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
