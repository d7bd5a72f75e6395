//! WebSocket push channel backed by the [`EventHub`](artifex_events::EventHub).

pub mod connections;
pub mod handler;
pub mod heartbeat;

pub use connections::WsConnections;
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
