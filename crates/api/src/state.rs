use std::sync::Arc;

use artifex_events::EventHub;
use artifex_worker::MediaJobService;

use crate::config::ServerConfig;
use crate::ws::WsConnections;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind `Arc` or is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Media job submission, status and waiting.
    pub jobs: Arc<MediaJobService>,
    /// Live event hub feeding WebSocket subscribers.
    pub hub: EventHub,
    /// Open WebSocket transports.
    pub ws_connections: WsConnections,
}
