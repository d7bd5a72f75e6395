use std::time::Duration;

use artifex_events::{DisconnectReason, HubMessage};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// How long a dropped subscriber's sender may keep flushing buffered events
/// and the Close frame before the socket is released regardless.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the event hub and
/// receives every job event published from then on.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Close frame sent when the hub dropped the subscriber.
fn close_frame(reason: Option<DisconnectReason>) -> Option<CloseFrame> {
    match reason? {
        DisconnectReason::Evicted => Some(CloseFrame {
            code: close_code::AGAIN,
            reason: "subscriber fell behind".into(),
        }),
        DisconnectReason::HubShutdown => Some(CloseFrame {
            code: close_code::AWAY,
            reason: "server shutting down".into(),
        }),
        DisconnectReason::ClientClosed => None,
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers a subscription with the hub.
///   2. Spawns a sender task that forwards hub messages to the sink and
///      closes the socket when the hub drops the subscription.
///   3. Processes inbound messages on the current task.
///   4. Releases the socket once the client leaves or the hub drops the
///      subscriber, even if the peer has stopped reading.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let _open = state.ws_connections.track();
    let mut subscription = state.hub.register();
    let conn_id = subscription.id();
    let dropped = subscription.dropped_token();
    tracing::info!(conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = subscription.recv().await {
            let frame = match msg {
                HubMessage::Event(payload) => Message::Text(payload.as_ref().into()),
                HubMessage::Ping => Message::Ping(Default::default()),
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(conn_id, "WebSocket sink closed");
                return;
            }
        }

        let reason = subscription.disconnect_reason();
        tracing::info!(conn_id, ?reason, "Hub dropped WebSocket subscriber");
        if let Some(frame) = close_frame(reason) {
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            // Sender finished: the hub dropped us or the sink failed.
            _ = &mut send_task => break,
            // The sender may be parked on a peer that stopped reading; give it
            // a bounded chance to flush, then release the socket.
            _ = dropped.cancelled() => {
                if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                    tracing::warn!(conn_id, "WebSocket peer not reading, dropping connection");
                }
                break;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id, "Pong received");
                }
                // The channel is push-only; inbound data is ignored.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    // Aborting drops the sink half; with the stream half dropped on return
    // the transport is closed. Dropping the subscription unregisters it.
    send_task.abort();
    tracing::info!(conn_id, "WebSocket disconnected");
}
