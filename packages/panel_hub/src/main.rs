use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod metrics;
mod notifications;
#[cfg(test)]
mod test_helpers;
mod ws;

use retry_policy::recovery_delay_ms;
use shell_cache::{FetchEngine, HttpUpstream, NotifierHandle, StatusNotifier};
use socket_mux::{Multiplexer, MuxHandle, WsConnector};

use crate::config::{HubConfig, load_config};
use crate::metrics::HubMetrics;
use crate::notifications::BroadcastSink;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "panelhub")]
#[command(about = "Connectivity and resilience hub for wall panel clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (defaults to ./panelhub.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub server in the foreground
    Serve(ServeArgs),

    /// Load, validate, and print the effective configuration
    CheckConfig,

    /// Print the reconnect delay the recovery policy picks for a failed probe
    Delay(DelayArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Port for the web server (overrides the configured port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides the configured host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct DelayArgs {
    /// Error message from the failed backend probe
    message: String,

    /// Consecutive failed attempts so far
    attempt: Option<f64>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub mux: MuxHandle,
    pub engine: Arc<FetchEngine<HttpUpstream>>,
    pub notifier: NotifierHandle,
    pub sink: BroadcastSink,
    /// Hub metrics for observability
    pub metrics: Arc<HubMetrics>,
    pub config: Arc<HubConfig>,
    /// Client for the upstream passthrough proxy
    pub http: reqwest::Client,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: HubConfig = load_config(cli.config.as_deref())
        .extract()
        .context("Invalid configuration")?;

    match cli.command {
        Commands::Serve(args) => run_server(args, config).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Delay(args) => {
            println!("{}", recovery_delay_ms(&args.message, args.attempt));
            Ok(())
        }
    }
}

fn check_config(config: &HubConfig) -> Result<()> {
    format!("{}:{}", config.server.host, config.server.port)
        .parse::<SocketAddr>()
        .context("server.host/server.port do not form a bindable address")?;
    reqwest::Url::parse(&config.upstream.origin)
        .context("upstream.origin is not a valid URL")?;

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

async fn run_server(args: ServeArgs, config: HubConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "panelhub=debug,tower_http=debug,info"
    } else {
        config.log.directive.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Panel Hub - connectivity hub for wall panel clients");

    let config = Arc::new(config);

    // Spawn the multiplexer and notifier actors
    let mux = Multiplexer::spawn(WsConnector);
    let sink = BroadcastSink::new();
    let notifier = StatusNotifier::spawn(sink.clone());

    // Bring the app-shell cache up: install, then activate
    let upstream = HttpUpstream::new(config.upstream.origin.clone());
    let engine = Arc::new(FetchEngine::new(
        upstream,
        &config.cache.shell_version,
        &config.cache.icon_version,
    ));

    info!(
        "Installing app shell (shell={}, icons={}) from {}",
        config.cache.shell_version, config.cache.icon_version, config.upstream.origin
    );
    engine.install().await;
    let deleted = engine.activate().await;
    if !deleted.is_empty() {
        info!("Dropped stale caches: {}", deleted.join(", "));
    }
    if notifier.sweep().await.is_err() {
        warn!("Notifier unavailable for the activation sweep");
    }

    // Initialize metrics
    let metrics = Arc::new(HubMetrics::new());

    let app_state = AppState {
        mux,
        engine,
        notifier,
        sink,
        metrics,
        config: config.clone(),
        http: reqwest::Client::new(),
    };

    // Build routes
    let app = Router::new()
        .route("/transport", get(ws::transport_handler))
        .route("/status", get(ws::status_handler))
        .route("/notifications", get(ws::notifications_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Everything else is fetch interception
        .fallback(handlers::intercept_handler)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}").parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Panel Hub listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET /transport     - multiplexed WebSocket transport");
    info!("  GET /status        - status heartbeat channel");
    info!("  GET /notifications - notification action stream");
    info!("  GET /health        - health summary");
    info!("  GET /metrics       - counters snapshot");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
