//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] on top of a
//! [`FakeSupervisor`], a static scene table and a temporary work directory.
//! Requests go through the real router with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use scenestream::config::{ApiKeyConfig, Config, SceneConfig};
use scenestream::server::{create_router, AppContext};
use scenestream::source::StaticSourceResolver;
use scenestream_common::SessionId;
use scenestream_transcode::testing::FakeSupervisor;
use scenestream_transcode::{Quality, TranscodeSettings};
use tempfile::TempDir;
use tower::ServiceExt;

/// Scene with a known 100-minute duration.
pub const SCENE: &str = "42";
/// Scene whose duration is unknown.
pub const SCENE_NO_DURATION: &str = "43";
pub const SCENE_DURATION_SECS: f64 = 6000.0;

pub const API_KEY: &str = "test-key";

pub struct TestHarness {
    pub ctx: AppContext,
    pub supervisor: Arc<FakeSupervisor>,
    pub work_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Harness with API key authentication turned on.
    pub fn with_auth() -> Self {
        let mut config = Config::default();
        config.server.auth.enabled = true;
        config.server.auth.api_keys.push(ApiKeyConfig {
            key: API_KEY.to_string(),
            user_id: uuid::Uuid::from_u128(0xabc),
        });
        Self::with_config(config)
    }

    pub fn with_config(mut config: Config) -> Self {
        let work_dir = tempfile::tempdir().expect("failed to create work dir");
        config.source.scenes = vec![
            SceneConfig {
                id: SCENE.to_string(),
                path: "/media/scene-42.mp4".into(),
                duration_secs: Some(SCENE_DURATION_SECS),
            },
            SceneConfig {
                id: SCENE_NO_DURATION.to_string(),
                path: "/media/scene-43.mkv".into(),
                duration_secs: None,
            },
        ];

        let settings = TranscodeSettings {
            work_dir: work_dir.path().to_path_buf(),
            segment_wait_timeout: Duration::from_millis(300),
            segment_poll_interval: Duration::from_millis(50),
            ..TranscodeSettings::default()
        };
        let supervisor = Arc::new(FakeSupervisor::new());
        let resolver = Arc::new(StaticSourceResolver::from_config(&config.source));
        let ctx = AppContext::new(config, settings, supervisor.clone(), resolver);

        Self {
            ctx,
            supervisor,
            work_dir,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Apply queued encoder exit events, as the server's event loop would.
    pub async fn settle(&self) {
        self.ctx.store.drain_events().await;
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Method::GET, uri, None).await
    }

    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let resp = self.get(uri).await;
        let status = resp.status();
        (status, body_text(resp).await)
    }

    /// Create a session over HTTP and return its id and response body.
    pub async fn create_session(&self, body: serde_json::Value) -> (SessionId, serde_json::Value) {
        let resp = self.request(Method::POST, "/api/sessions", Some(body)).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        let id = json["session_id"].as_str().unwrap().parse().unwrap();
        (id, json)
    }

    pub fn write_segments(&self, id: SessionId, quality: Quality, count: u32) {
        self.supervisor
            .write_segments(id, quality, count)
            .expect("failed to write segments");
    }

    /// Start an Axum server on a random port.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
