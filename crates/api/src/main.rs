use std::net::SocketAddr;
use std::sync::Arc;

use artifex_core::storage::LocalArtifactStore;
use artifex_events::{EventHub, HubConfig};
use artifex_pipeline::MediaRenderer;
use artifex_worker::MediaJobService;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artifex_api::config::ServerConfig;
use artifex_api::{router, state, ws};

use state::AppState;

/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "artifex_api=debug,artifex_worker=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        artifact_root = %config.jobs.artifact_root.display(),
        "Loaded server configuration"
    );

    // --- Artifact store ---
    let store = Arc::new(LocalArtifactStore::new(config.jobs.artifact_root.clone()));
    store
        .ensure_layout()
        .expect("Failed to prepare artifact directories");
    tracing::info!("Artifact store ready");

    // --- Renderer ---
    let renderer = Arc::new(
        MediaRenderer::new(config.jobs.artifact_root.join(".scratch"))
            .with_max_thumbnail_edge(config.jobs.thumbnail_max_edge),
    );

    // --- Event hub ---
    let hub = EventHub::start(HubConfig {
        subscriber_buffer: config.jobs.subscriber_buffer,
        publish_buffer: config.jobs.publish_buffer,
    });
    tracing::info!("Event hub started");

    // --- Job service (worker pool + registry janitor) ---
    let jobs = MediaJobService::start(&config.jobs, store, renderer, hub.clone());

    // --- Heartbeat ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(hub.clone(), heartbeat_cancel.clone());

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::clone(&jobs),
        hub: hub.clone(),
        ws_connections: ws::WsConnections::new(),
    };

    // --- Router ---
    let app = router::build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Open WebSocket connections and long-polls only end once the job
    // service and hub have stopped, so both shut down before the server
    // finishes draining connections.
    let shutdown_jobs = Arc::clone(&jobs);
    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;

            shutdown_jobs.shutdown().await;
            tracing::info!("Job service shut down");

            tracing::info!(
                subscribers = shutdown_hub.subscriber_count(),
                "Closing remaining WebSocket connections"
            );
            shutdown_hub.shutdown().await;
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    tracing::info!("Heartbeat task stopped");

    let stats = hub.stats();
    tracing::info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped,
        evicted = stats.evicted,
        "Graceful shutdown complete"
    );
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
