use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Gauge of open WebSocket connections.
///
/// Counts transports, not hub subscriptions: a connection stays counted
/// until its socket is actually released, even after the hub dropped it.
#[derive(Clone, Default)]
pub struct WsConnections {
    open: Arc<AtomicUsize>,
}

impl WsConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently open.
    pub fn count(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            open: Arc::clone(&self.open),
        }
    }
}

pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
    }
}
