//! The status heartbeat endpoint.
//!
//! Receive-only from the hub's point of view: clients push `statusUpdate`
//! and `notification-heartbeat` frames at the notifier. Connection count
//! doubles as the visible-client count for activation sweeps.

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use shell_cache::{NotifierHandle, StatusMessage};

use crate::AppState;
use crate::metrics::HubMetrics;

pub async fn status_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let notifier = state.notifier.clone();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| handle_status(socket, notifier, metrics))
}

async fn handle_status(mut socket: WebSocket, notifier: NotifierHandle, metrics: Arc<HubMetrics>) {
    if notifier.client_attached().await.is_err() {
        warn!("Notifier is gone; dropping status connection");
        return;
    }
    metrics.status_opened();
    debug!("Status client attached");

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => {
                metrics.frame_received();
                let Ok(message) = serde_json::from_str::<StatusMessage>(&text) else {
                    metrics.frame_malformed();
                    debug!("Malformed status frame dropped");
                    continue;
                };
                if notifier.status(message).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Status client closed");
                break;
            }
            Err(e) => {
                error!("Status WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    if notifier.client_detached().await.is_err() {
        debug!("Notifier already gone at detach");
    }
    metrics.status_closed();
    debug!("Status client detached");
}
