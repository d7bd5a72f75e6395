use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use artifex_api::config::ServerConfig;
use artifex_api::router::build_app_router;
use artifex_api::state::AppState;
use artifex_api::ws::WsConnections;
use artifex_core::config::JobSystemConfig;
use artifex_core::job::JobParams;
use artifex_core::render::{RenderError, RenderOutput, Renderer};
use artifex_core::storage::LocalArtifactStore;
use artifex_events::{EventHub, HubConfig};
use artifex_pipeline::MediaRenderer;
use artifex_worker::MediaJobService;
use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

/// Longest a gated render blocks before proceeding on its own.
const GATE_LIMIT: Duration = Duration::from_secs(10);

/// A running application wired to a temporary artifact root.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    root: TempDir,
}

impl TestApp {
    /// Directory for source files the test creates.
    pub fn source_dir(&self) -> PathBuf {
        self.root.path().join("sources")
    }

    /// Write a source file and return its path.
    pub fn write_source(&self, name: &str, contents: &str) -> PathBuf {
        let dir = self.source_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

/// Build a test `ServerConfig` with safe defaults rooted at `root`.
pub fn test_config(root: &TempDir, num_workers: usize, queue_size: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        jobs: JobSystemConfig {
            num_workers,
            queue_size,
            shutdown_grace: Duration::from_millis(200),
            artifact_root: root.path().join("artifacts"),
            ..JobSystemConfig::default()
        },
    }
}

/// Build the full application with the production [`MediaRenderer`].
///
/// Uses the same router builder as `main.rs` so tests exercise the real
/// middleware stack.
pub fn build_test_app() -> TestApp {
    let root = TempDir::new().unwrap();
    let config = test_config(&root, 2, 16);
    let renderer = Arc::new(MediaRenderer::new(config.jobs.artifact_root.join(".scratch")));
    build_with_renderer(root, config, renderer)
}

/// Build an application whose push subscribers can hold only
/// `subscriber_buffer` undelivered messages.
pub fn build_small_buffer_app(subscriber_buffer: usize) -> TestApp {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root, 2, 16);
    config.jobs.subscriber_buffer = subscriber_buffer;
    let renderer = Arc::new(MediaRenderer::new(config.jobs.artifact_root.join(".scratch")));
    build_with_renderer(root, config, renderer)
}

/// Build an application whose renders block until [`Gate::open`] is called.
pub fn build_gated_app(num_workers: usize, queue_size: usize) -> (TestApp, Gate) {
    let root = TempDir::new().unwrap();
    let config = test_config(&root, num_workers, queue_size);
    let gate = Gate::default();
    let renderer_gate = gate.clone();
    let renderer = Arc::new(move |params: &JobParams| {
        renderer_gate.pass();
        Ok::<_, RenderError>(RenderOutput::Bytes(
            params.target_key().as_str().as_bytes().to_vec(),
        ))
    });
    let app = build_with_renderer(root, config, renderer);
    (app, gate)
}

fn build_with_renderer(
    root: TempDir,
    config: ServerConfig,
    renderer: Arc<dyn Renderer>,
) -> TestApp {
    let store = Arc::new(LocalArtifactStore::new(config.jobs.artifact_root.clone()));
    store.ensure_layout().unwrap();

    let hub = EventHub::start(HubConfig {
        subscriber_buffer: config.jobs.subscriber_buffer,
        publish_buffer: config.jobs.publish_buffer,
    });
    let jobs = MediaJobService::start(&config.jobs, store, renderer, hub.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs,
        hub,
        ws_connections: WsConnections::new(),
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        root,
    }
}

/// Blocks renders until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (open, released) = &*self.inner;
        *open.lock().unwrap() = true;
        released.notify_all();
    }

    fn pass(&self) {
        let (open, released) = &*self.inner;
        let guard = open.lock().unwrap();
        let _ = released
            .wait_timeout_while(guard, GATE_LIMIT, |open| !*open)
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body through the router.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Query string addressing `key`, percent-encoded.
pub fn key_query(key: &str) -> String {
    format!("key={}", urlencoding::encode(key))
}
