//! Fetch interception engine.
//!
//! Lifecycle is `install → activate → (intercept)*`. The engine owns the
//! named caches behind one lock and talks to the origin through an
//! [`Upstream`], so tests drive it with a scripted fake while production
//! wires reqwest.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ShellCacheError;
use crate::policy::{self, FetchClass, FetchRequest, SHELL_KEY};
use crate::store::{CacheSet, CachedResponse};

/// One GET against the backing origin. `headers` carries the caller's
/// relayed request headers; install-time precaching passes none.
pub trait Upstream: Send + Sync + 'static {
    fn fetch(
        &self,
        path: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<CachedResponse, ShellCacheError>> + Send;
}

/// Production upstream: one reqwest client against a fixed origin.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    origin: String,
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl Upstream for HttpUpstream {
    async fn fetch(
        &self,
        path: &str,
        headers: &[(String, String)],
    ) -> Result<CachedResponse, ShellCacheError> {
        let url = format!("{}{}", self.origin, path);
        let mut request = self.client.get(&url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|err| ShellCacheError::Upstream(err.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| ShellCacheError::Upstream(err.to_string()))?
            .to_vec();

        Ok(CachedResponse::new(status, content_type, body))
    }
}

/// Counters for interception activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Assets successfully stored during install.
    pub shell_assets_installed: AtomicU64,
    /// Cache-first requests answered from cache.
    pub cache_hits: AtomicU64,
    /// Cache-first requests that had to go upstream.
    pub cache_misses: AtomicU64,
    /// Offline placeholders served.
    pub offline_responses: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            shell_assets_installed: self.shell_assets_installed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            offline_responses: self.offline_responses.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of interception counters (for serialization/logging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub shell_assets_installed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub offline_responses: u64,
}

/// The engine's verdict on one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercept {
    /// Not ours: the caller forwards the request untouched.
    Passthrough,
    /// Serve this response.
    Respond(CachedResponse),
}

pub struct FetchEngine<U> {
    upstream: U,
    caches: RwLock<CacheSet>,
    shell_cache: String,
    icon_cache: String,
    shell_assets: Vec<String>,
    stats: Arc<CacheStats>,
}

impl<U: Upstream> FetchEngine<U> {
    pub fn new(upstream: U, shell_version: &str, icon_version: &str) -> Self {
        Self {
            upstream,
            caches: RwLock::new(CacheSet::new()),
            shell_cache: policy::shell_cache_name(shell_version),
            icon_cache: policy::icon_cache_name(icon_version),
            shell_assets: policy::shell_assets(shell_version),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    /// Populate the caches from the static asset allow-list. Icon-prefixed
    /// assets land in the icon cache, where icon requests look them up;
    /// everything else goes to the app-shell cache. Individual failures are
    /// logged and skipped; install always completes.
    pub async fn install(&self) {
        for asset in &self.shell_assets {
            let cache = if asset.starts_with(policy::ICON_PATH_PREFIX) {
                &self.icon_cache
            } else {
                &self.shell_cache
            };
            match self.upstream.fetch(asset, &[]).await {
                Ok(response) if response.ok() => {
                    self.caches
                        .write()
                        .await
                        .open(cache)
                        .put(asset.clone(), response);
                    self.stats.shell_assets_installed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(response) => {
                    warn!(%asset, status = response.status, "asset skipped during install");
                }
                Err(err) => {
                    warn!(%asset, error = %err, "asset fetch failed during install");
                }
            }
        }
        info!(cache = %self.shell_cache, "install complete");
    }

    /// Delete every cache except the current shell and icon names. Returns
    /// the deleted names.
    pub async fn activate(&self) -> Vec<String> {
        let deleted = self
            .caches
            .write()
            .await
            .delete_others(&[self.shell_cache.as_str(), self.icon_cache.as_str()]);
        if !deleted.is_empty() {
            info!(?deleted, "stale caches deleted");
        }
        deleted
    }

    /// Serve one intercepted request per the classification rules.
    pub async fn intercept(&self, request: &FetchRequest) -> Intercept {
        match policy::classify(request) {
            FetchClass::Passthrough => Intercept::Passthrough,
            FetchClass::NetworkOnly => Intercept::Respond(self.network_only(request).await),
            FetchClass::Navigation { shell } => {
                Intercept::Respond(self.navigation(request, shell).await)
            }
            FetchClass::CacheFirst { icon } => {
                Intercept::Respond(self.cache_first(request, icon).await)
            }
        }
    }

    async fn network_only(&self, request: &FetchRequest) -> CachedResponse {
        match self.upstream.fetch(&request.target(), &request.headers).await {
            Ok(response) => response,
            Err(err) => {
                debug!(path = %request.path, error = %err, "network-only fetch failed");
                self.offline()
            }
        }
    }

    async fn navigation(&self, request: &FetchRequest, shell: bool) -> CachedResponse {
        match self.upstream.fetch(&request.target(), &request.headers).await {
            Ok(response) => {
                if shell && response.ok() {
                    self.caches
                        .write()
                        .await
                        .open(&self.shell_cache)
                        .put(SHELL_KEY, response.clone());
                }
                response
            }
            Err(err) => {
                debug!(path = %request.path, error = %err, "navigation fetch failed");
                if shell {
                    if let Some(cached) = self.cached(&self.shell_cache, SHELL_KEY).await {
                        return cached;
                    }
                }
                // A sub-frame's failed navigation must not serve (or ever
                // overwrite) the cached shell.
                self.offline()
            }
        }
    }

    async fn cache_first(&self, request: &FetchRequest, icon: bool) -> CachedResponse {
        let cache = if icon { &self.icon_cache } else { &self.shell_cache };
        let target = request.target();

        if let Some(cached) = self.cached(cache, &target).await {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        match self.upstream.fetch(&target, &request.headers).await {
            Ok(response) => {
                if response.ok() {
                    self.caches.write().await.open(cache).put(target, response.clone());
                }
                response
            }
            Err(err) => {
                debug!(path = %request.path, error = %err, "fetch failed");
                // A racing fill may have landed while we were upstream.
                match self.cached(cache, &target).await {
                    Some(cached) => cached,
                    None => self.offline(),
                }
            }
        }
    }

    async fn cached(&self, cache: &str, key: &str) -> Option<CachedResponse> {
        self.caches
            .read()
            .await
            .get(cache)
            .and_then(|store| store.get(key))
            .cloned()
    }

    fn offline(&self) -> CachedResponse {
        self.stats.offline_responses.fetch_add(1, Ordering::Relaxed);
        CachedResponse::offline_placeholder()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::policy::TENANT_CONFIG_PATH;
    use crate::store::{OFFLINE_BODY, OFFLINE_STATUS};

    #[derive(Clone, Default)]
    struct FakeUpstream {
        responses: Arc<Mutex<HashMap<String, CachedResponse>>>,
        calls: Arc<Mutex<Vec<String>>>,
        headers_seen: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
        offline: Arc<AtomicBool>,
    }

    impl FakeUpstream {
        fn new() -> Self {
            Self::default()
        }

        fn serve(&self, path: &str, body: &str) {
            self.responses.lock().unwrap().insert(
                path.to_string(),
                CachedResponse::new(200, "text/plain", body.as_bytes().to_vec()),
            );
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls_for(&self, path: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.as_str() == path)
                .count()
        }

        /// Headers seen on the most recent fetch of `path`.
        fn headers_for(&self, path: &str) -> Vec<(String, String)> {
            self.headers_seen
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl Upstream for FakeUpstream {
        async fn fetch(
            &self,
            path: &str,
            headers: &[(String, String)],
        ) -> Result<CachedResponse, ShellCacheError> {
            self.calls.lock().unwrap().push(path.to_string());
            self.headers_seen
                .lock()
                .unwrap()
                .insert(path.to_string(), headers.to_vec());
            if self.offline.load(Ordering::SeqCst) {
                return Err(ShellCacheError::Upstream("connection refused".to_string()));
            }
            match self.responses.lock().unwrap().get(path) {
                Some(response) => Ok(response.clone()),
                None => Ok(CachedResponse::new(404, "text/plain", b"not found".to_vec())),
            }
        }
    }

    /// Engine over a fake that serves the whole "v1" asset allow-list.
    fn engine() -> (FetchEngine<FakeUpstream>, FakeUpstream) {
        let upstream = FakeUpstream::new();
        for asset in policy::shell_assets("v1") {
            upstream.serve(&asset, &format!("asset:{asset}"));
        }
        (FetchEngine::new(upstream.clone(), "v1", "v3"), upstream)
    }

    fn body(intercept: Intercept) -> Vec<u8> {
        match intercept {
            Intercept::Respond(response) => response.body,
            Intercept::Passthrough => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn install_populates_the_shell_cache_and_skips_failures() {
        let upstream = FakeUpstream::new();
        upstream.serve("/index.html", "shell");
        upstream.serve("/manifest.json", "manifest");
        // Everything else 404s and must be skipped, not fatal.
        let engine = FetchEngine::new(upstream.clone(), "v1", "v3");

        engine.install().await;

        let caches = engine.caches.read().await;
        let store = caches.get(&engine.shell_cache).unwrap();
        assert!(store.contains("/index.html"));
        assert!(store.contains("/manifest.json"));
        assert_eq!(store.len(), 2);
        assert_eq!(engine.stats.snapshot().shell_assets_installed, 2);
    }

    #[tokio::test]
    async fn install_never_requests_the_tenant_config() {
        let (engine, upstream) = engine();
        engine.install().await;
        assert_eq!(upstream.calls_for(TENANT_CONFIG_PATH), 0);
    }

    #[tokio::test]
    async fn activate_retains_only_the_current_cache_names() {
        let (engine, _upstream) = engine();
        engine.install().await;
        {
            let mut caches = engine.caches.write().await;
            caches.open(&engine.icon_cache);
            caches.open("panelhub-shell-v0");
            caches.open("other");
        }

        let deleted = engine.activate().await;
        assert_eq!(deleted, vec!["other".to_string(), "panelhub-shell-v0".to_string()]);
        assert_eq!(
            engine.caches.read().await.names(),
            vec![engine.icon_cache.clone(), engine.shell_cache.clone()]
        );
    }

    #[tokio::test]
    async fn denylisted_get_never_touches_a_cache() {
        let (engine, upstream) = engine();
        upstream.serve("/api/state", "live");
        let request = FetchRequest::get("/api/state");

        assert_eq!(body(engine.intercept(&request).await), b"live");
        assert_eq!(body(engine.intercept(&request).await), b"live");

        assert_eq!(upstream.calls_for("/api/state"), 2);
        let caches = engine.caches.read().await;
        for name in caches.names() {
            assert!(!caches.get(&name).unwrap().contains("/api/state"));
        }
    }

    #[tokio::test]
    async fn network_fetches_forward_the_query_string() {
        let (engine, upstream) = engine();
        upstream.serve("/api/history?hours=24", "history");
        let mut request = FetchRequest::get("/api/history");
        request.query = Some("hours=24".to_string());

        assert_eq!(body(engine.intercept(&request).await), b"history");
        assert_eq!(upstream.calls_for("/api/history?hours=24"), 1);
        assert_eq!(upstream.calls_for("/api/history"), 0);
    }

    #[tokio::test]
    async fn network_fetches_relay_the_callers_headers() {
        let (engine, upstream) = engine();
        upstream.serve("/api/state", "live");
        let mut request = FetchRequest::get("/api/state");
        request.headers = vec![
            ("authorization".to_string(), "Bearer t0ken".to_string()),
            ("cookie".to_string(), "session=abc".to_string()),
        ];

        assert_eq!(body(engine.intercept(&request).await), b"live");
        assert_eq!(upstream.headers_for("/api/state"), request.headers);
    }

    #[tokio::test]
    async fn cache_miss_fetches_relay_headers_but_install_sends_none() {
        let (engine, upstream) = engine();
        engine.install().await;
        assert!(upstream.headers_for("/index.html").is_empty());

        upstream.serve("/widget.js", "widget");
        let mut request = FetchRequest::get("/widget.js");
        request.headers = vec![("authorization".to_string(), "Bearer t0ken".to_string())];

        assert_eq!(body(engine.intercept(&request).await), b"widget");
        assert_eq!(upstream.headers_for("/widget.js"), request.headers);
    }

    #[tokio::test]
    async fn denylisted_get_offline_gets_the_generic_placeholder() {
        let (engine, upstream) = engine();
        upstream.set_offline(true);

        match engine.intercept(&FetchRequest::get("/api/state")).await {
            Intercept::Respond(response) => {
                assert_eq!(response.status, OFFLINE_STATUS);
                assert_eq!(response.body, OFFLINE_BODY.as_bytes());
            }
            Intercept::Passthrough => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn allowlisted_asset_second_request_is_served_from_cache() {
        let (engine, upstream) = engine();
        engine.install().await;
        let calls_after_install = upstream.calls_for("/app.v1.js");

        let response = body(engine.intercept(&FetchRequest::get("/app.v1.js")).await);
        assert_eq!(response, b"asset:/app.v1.js");
        assert_eq!(upstream.calls_for("/app.v1.js"), calls_after_install);
        assert_eq!(engine.stats.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn cache_first_fetches_and_stores_on_miss() {
        let (engine, upstream) = engine();
        upstream.serve("/widget.js", "widget");

        assert_eq!(body(engine.intercept(&FetchRequest::get("/widget.js")).await), b"widget");
        assert_eq!(body(engine.intercept(&FetchRequest::get("/widget.js")).await), b"widget");
        assert_eq!(upstream.calls_for("/widget.js"), 1);
    }

    #[tokio::test]
    async fn cache_first_does_not_store_failures() {
        let (engine, upstream) = engine();
        // 404s every time: served through, never cached.
        assert_eq!(body(engine.intercept(&FetchRequest::get("/nope.js")).await), b"not found");
        assert_eq!(body(engine.intercept(&FetchRequest::get("/nope.js")).await), b"not found");
        assert_eq!(upstream.calls_for("/nope.js"), 2);
    }

    #[tokio::test]
    async fn cache_first_miss_while_offline_returns_the_placeholder() {
        let (engine, upstream) = engine();
        upstream.set_offline(true);

        match engine.intercept(&FetchRequest::get("/widget.js")).await {
            Intercept::Respond(response) => assert_eq!(response.status, OFFLINE_STATUS),
            Intercept::Passthrough => panic!("expected a response"),
        }
        assert_eq!(engine.stats.snapshot().offline_responses, 1);
    }

    #[tokio::test]
    async fn icon_requests_use_the_icon_cache() {
        let (engine, upstream) = engine();
        let path = "/assets/icons/icon-192.png";

        assert_eq!(
            body(engine.intercept(&FetchRequest::get(path)).await),
            format!("asset:{path}").as_bytes()
        );
        assert_eq!(upstream.calls_for(path), 1);

        let caches = engine.caches.read().await;
        assert!(caches.get(&engine.icon_cache).unwrap().contains(path));
        assert!(caches.get(&engine.shell_cache).is_none());
    }

    #[tokio::test]
    async fn installed_icons_are_served_from_the_icon_cache() {
        let (engine, upstream) = engine();
        engine.install().await;
        let path = "/assets/icons/icon-192.png";
        let calls_after_install = upstream.calls_for(path);

        assert_eq!(
            body(engine.intercept(&FetchRequest::get(path)).await),
            format!("asset:{path}").as_bytes()
        );
        // No refetch: the install-time copy is where icon requests look.
        assert_eq!(upstream.calls_for(path), calls_after_install);

        let caches = engine.caches.read().await;
        assert!(caches.get(&engine.icon_cache).unwrap().contains(path));
        assert!(!caches.get(&engine.shell_cache).unwrap().contains(path));
    }

    #[tokio::test]
    async fn navigation_refreshes_the_cached_shell_copy() {
        let (engine, upstream) = engine();
        upstream.serve("/", "fresh shell");

        assert_eq!(body(engine.intercept(&FetchRequest::navigation("/")).await), b"fresh shell");

        let caches = engine.caches.read().await;
        let cached = caches.get(&engine.shell_cache).unwrap().get(SHELL_KEY).unwrap();
        assert_eq!(cached.body, b"fresh shell");
    }

    #[tokio::test]
    async fn shell_navigation_offline_falls_back_to_the_cached_shell() {
        let (engine, upstream) = engine();
        engine.install().await;
        upstream.set_offline(true);

        assert_eq!(
            body(engine.intercept(&FetchRequest::navigation("/")).await),
            b"asset:/index.html"
        );
    }

    #[tokio::test]
    async fn subframe_navigation_offline_gets_the_placeholder_not_the_shell() {
        let (engine, upstream) = engine();
        engine.install().await;
        upstream.set_offline(true);

        match engine.intercept(&FetchRequest::navigation("/embed/camera")).await {
            Intercept::Respond(response) => {
                assert_eq!(response.status, OFFLINE_STATUS);
                assert_eq!(response.body, OFFLINE_BODY.as_bytes());
            }
            Intercept::Passthrough => panic!("expected a response"),
        }

        // The cached shell survived untouched.
        let caches = engine.caches.read().await;
        let cached = caches.get(&engine.shell_cache).unwrap().get(SHELL_KEY).unwrap();
        assert_eq!(cached.body, b"asset:/index.html");
    }

    #[tokio::test]
    async fn subframe_navigation_success_is_not_cached() {
        let (engine, upstream) = engine();
        upstream.serve("/embed/camera", "frame");

        assert_eq!(
            body(engine.intercept(&FetchRequest::navigation("/embed/camera")).await),
            b"frame"
        );
        let caches = engine.caches.read().await;
        assert!(caches.get(&engine.shell_cache).is_none());
    }

    #[tokio::test]
    async fn non_get_and_cross_origin_pass_through_untouched() {
        let (engine, upstream) = engine();

        let mut request = FetchRequest::get("/app.v1.js");
        request.method = "POST".to_string();
        assert_eq!(engine.intercept(&request).await, Intercept::Passthrough);

        let mut request = FetchRequest::get("/app.v1.js");
        request.same_origin = false;
        assert_eq!(engine.intercept(&request).await, Intercept::Passthrough);

        assert!(upstream.calls.lock().unwrap().is_empty());
    }
}
