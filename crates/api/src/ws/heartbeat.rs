use std::time::Duration;

use artifex_events::EventHub;
use tokio_util::sync::CancellationToken;

/// Interval between heartbeat pings (in seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that asks every hub subscriber to send a Ping
/// frame to its client.
///
/// Pings travel through the same per-subscriber buffer as events, so a
/// client that stops reading is evicted by the hub. The task exits when
/// `cancel` is triggered.
pub fn start_heartbeat(hub: EventHub, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Heartbeat stopping");
                    break;
                }
                _ = interval.tick() => {
                    tracing::debug!(count = hub.subscriber_count(), "WebSocket heartbeat ping");
                    hub.ping_all();
                }
            }
        }
    })
}
