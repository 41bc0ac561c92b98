use std::sync::Arc;

use shell_cache::{FetchEngine, HttpUpstream, StatusNotifier};
use socket_mux::{Multiplexer, WsConnector};

use crate::AppState;
use crate::config::HubConfig;
use crate::metrics::HubMetrics;
use crate::notifications::BroadcastSink;

/// Build a fully-wired `AppState` pointed at an unroutable loopback
/// upstream, so handler tests exercise the real router and actors without
/// anything listening on the other side.
pub(crate) fn test_app_state() -> AppState {
    let mut config = HubConfig::default();
    config.upstream.origin = "http://127.0.0.1:9".to_string();

    let sink = BroadcastSink::new();
    AppState {
        mux: Multiplexer::spawn(WsConnector),
        engine: Arc::new(FetchEngine::new(
            HttpUpstream::new(config.upstream.origin.clone()),
            "v1",
            "v3",
        )),
        notifier: StatusNotifier::spawn(sink.clone()),
        sink,
        metrics: Arc::new(HubMetrics::new()),
        config: Arc::new(config),
        http: reqwest::Client::new(),
    }
}
