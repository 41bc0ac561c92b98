//! The multiplexed transport endpoint.
//!
//! Each connection is one Port: inbound JSON frames become
//! [`PortCommand`]s, multiplexer events come back as JSON frames, and the
//! port (with every socket it owns) dies with the connection.

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use socket_mux::{MuxHandle, PortCommand};

use crate::AppState;
use crate::metrics::HubMetrics;

pub async fn transport_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let mux = state.mux.clone();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| handle_transport(socket, mux, metrics))
}

async fn handle_transport(socket: WebSocket, mux: MuxHandle, metrics: Arc<HubMetrics>) {
    let connection = match mux.attach().await {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Transport attach failed: {}", e);
            return;
        }
    };
    let port_id = connection.port_id;
    let mut events = connection.events;

    metrics.transport_opened();
    info!(%port_id, "Transport port attached");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to forward multiplexer events to the WebSocket
    let sender_task = async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize port event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Task to relay client frames into the multiplexer
    let mux_input = mux.clone();
    let metrics_input = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics_input.frame_received();
                    // Frames that are not valid commands are dropped, not fatal.
                    let Ok(command) = serde_json::from_str::<PortCommand>(&text) else {
                        metrics_input.frame_malformed();
                        debug!(%port_id, "Malformed transport frame dropped");
                        continue;
                    };
                    if mux_input.command(port_id, command).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(%port_id, "Client closed transport connection");
                    break;
                }
                Err(e) => {
                    error!(%port_id, "Transport WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(%port_id, "Transport sender task ended"),
        _ = input_task => debug!(%port_id, "Transport input task ended"),
    }

    // Tear down the port and everything it owns; harmless if the client
    // already sent transport-port-close.
    if mux.detach(port_id).await.is_err() {
        debug!(%port_id, "Multiplexer already gone at detach");
    }
    metrics.transport_closed();
    info!(%port_id, "Transport port detached");
}
