use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use artifex_core::config::JobSystemConfig;
use artifex_core::job::{JobParams, JobRequest};
use artifex_core::render::{RenderError, RenderOutput, Renderer};
use artifex_core::storage::LocalArtifactStore;
use artifex_events::{EventHub, HubConfig};
use artifex_worker::MediaJobService;
use tempfile::TempDir;

/// Longest a gated render will block before proceeding on its own, so a
/// failing test can never hang the runtime on a parked blocking thread.
const GATE_LIMIT: Duration = Duration::from_secs(10);

/// A renderer whose calls block until the test lets them through.
///
/// Sources containing `fail` produce a render error; sources containing
/// `panic` panic inside the renderer.
pub struct TestRenderer {
    permits: Mutex<usize>,
    released: Condvar,
    calls: AtomicUsize,
}

impl TestRenderer {
    /// Every render blocks until released.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            permits: Mutex::new(0),
            released: Condvar::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Renders proceed immediately.
    pub fn open() -> Arc<Self> {
        let renderer = Self::gated();
        renderer.open_gate();
        renderer
    }

    /// Let every current and future render through.
    pub fn open_gate(&self) {
        *self.permits.lock().unwrap() = usize::MAX;
        self.released.notify_all();
    }

    /// Number of times `render` has been entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pass_gate(&self) {
        let deadline = Instant::now() + GATE_LIMIT;
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            permits = self.released.wait_timeout(permits, deadline - now).unwrap().0;
        }
        if *permits != usize::MAX {
            *permits -= 1;
        }
    }
}

impl Renderer for TestRenderer {
    fn render(&self, params: &JobParams) -> Result<RenderOutput, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate();

        if let JobParams::Thumbnail { source, .. } = params {
            let source = source.to_string_lossy();
            if source.contains("panic") {
                panic!("decoder crashed on {source}");
            }
            if source.contains("fail") {
                return Err(RenderError::Failed("decoder rejected input".into()));
            }
        }
        Ok(RenderOutput::Bytes(params.target_key().as_str().as_bytes().to_vec()))
    }
}

pub struct TestService {
    pub service: Arc<MediaJobService>,
    pub store: Arc<LocalArtifactStore>,
    pub hub: EventHub,
    _root: TempDir,
}

/// Configuration with the given pool sizing and test-friendly timings.
pub fn test_config(num_workers: usize, queue_size: usize) -> JobSystemConfig {
    JobSystemConfig {
        num_workers,
        queue_size,
        shutdown_grace: Duration::from_millis(200),
        ..JobSystemConfig::default()
    }
}

/// Start a service with its own artifact root and event hub.
pub fn start_service(config: JobSystemConfig, renderer: Arc<TestRenderer>) -> TestService {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalArtifactStore::new(root.path()));
    let hub = EventHub::start(HubConfig::default());
    let service = MediaJobService::start(&config, store.clone(), renderer, hub.clone());
    TestService {
        service,
        store,
        hub,
        _root: root,
    }
}

pub fn thumbnail(source: &str) -> JobRequest {
    JobRequest::new(JobParams::Thumbnail {
        source: source.into(),
        max_width: 320,
        max_height: 240,
    })
    .unwrap()
}

pub fn archive(album_id: &str, entries: &[&str]) -> JobRequest {
    JobRequest::new(JobParams::Archive {
        album_id: album_id.to_string(),
        entries: entries.iter().map(Into::into).collect(),
    })
    .unwrap()
}
