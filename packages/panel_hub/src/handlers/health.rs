use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns hub status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let transport = state.mux.stats().snapshot();

    let status = if transport.events_dropped == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        started_at: state.metrics.started_at().to_rfc3339(),
        uptime_secs: state.metrics.uptime_secs(),
        ports: metrics::PortHealth {
            active: transport.ports_active,
            attached: transport.ports_attached,
        },
        sockets: metrics::SocketHealth {
            active: transport.sockets_active,
            opened: transport.sockets_opened,
        },
    })
}

/// Metrics endpoint - returns detailed hub counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot(
        state.mux.stats().snapshot(),
        state.engine.stats().snapshot(),
    ))
}
