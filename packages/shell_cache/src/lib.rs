//! Shell Cache - offline app-shell caching and status notification library
//!
//! Two independent pieces share this crate: a fetch-interception engine that
//! serves a versioned offline-capable application shell (install, activate,
//! cache-first and network-first routing, a synthetic `503 "Offline"`
//! fallback), and a status-notification heartbeat that keeps at most one
//! live notification shown and retracts it when its reporting client goes
//! silent.
//!
//! # Example
//!
//! ```no_run
//! use shell_cache::{FetchEngine, FetchRequest, HttpUpstream, Intercept};
//!
//! #[tokio::main]
//! async fn main() {
//!     let upstream = HttpUpstream::new("http://127.0.0.1:8123");
//!     let engine = FetchEngine::new(upstream, "20240811", "v3");
//!
//!     engine.install().await;
//!     engine.activate().await;
//!
//!     match engine.intercept(&FetchRequest::get("/app.20240811.js")).await {
//!         Intercept::Respond(response) => println!("{} ({} bytes)", response.status, response.body.len()),
//!         Intercept::Passthrough => println!("not ours"),
//!     }
//! }
//! ```

mod error;
mod fetch;
mod notify;
pub mod policy;
mod store;

pub use error::ShellCacheError;
pub use fetch::{CacheStats, CacheStatsSnapshot, FetchEngine, HttpUpstream, Intercept, Upstream};
pub use notify::{
    HEARTBEAT_TIMEOUT, NotificationSink, NotifierHandle, StatusMessage, StatusNotifier,
};
pub use policy::{FetchClass, FetchRequest, classify};
pub use store::{CacheSet, CachedResponse, OFFLINE_BODY, OFFLINE_STATUS, Store};
