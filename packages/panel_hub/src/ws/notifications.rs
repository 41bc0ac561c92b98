//! The notification action stream.
//!
//! Watchers subscribe here to render notifications somewhere real (a
//! desktop agent, a test harness, another tab). Show/close/focus actions
//! flow out; `notificationclick` flows back in.

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use shell_cache::NotifierHandle;

use crate::AppState;
use crate::metrics::HubMetrics;
use crate::notifications::{BroadcastSink, WatcherEvent};

pub async fn notifications_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let sink = state.sink.clone();
    let notifier = state.notifier.clone();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| handle_notifications(socket, sink, notifier, metrics))
}

async fn handle_notifications(
    socket: WebSocket,
    sink: BroadcastSink,
    notifier: NotifierHandle,
    metrics: Arc<HubMetrics>,
) {
    let mut actions = sink.subscribe();
    metrics.watcher_opened();
    debug!("Notification watcher attached");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to stream notification actions to the watcher
    let sender_task = async move {
        loop {
            match actions.recv().await {
                Ok(action) => {
                    let json = match serde_json::to_string(&action) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize notification action: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Notification stream lagged by {} actions", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    // Task to relay clicks back to the notifier
    let metrics_input = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics_input.frame_received();
                    let Ok(event) = serde_json::from_str::<WatcherEvent>(&text) else {
                        metrics_input.frame_malformed();
                        debug!("Malformed watcher frame dropped");
                        continue;
                    };
                    match event {
                        WatcherEvent::Click => {
                            if notifier.click().await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Notification watcher closed");
                    break;
                }
                Err(e) => {
                    error!("Notification WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Notification sender task ended"),
        _ = input_task => debug!("Notification input task ended"),
    }

    metrics.watcher_closed();
    debug!("Notification watcher detached");
}
