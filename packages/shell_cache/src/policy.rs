//! Request classification rules.
//!
//! Pure functions, no I/O: the engine asks [`classify`] what to do with an
//! intercepted request and this module answers from method, origin,
//! navigation mode, and path alone.

/// Fixed logical key the cached shell document lives under, regardless of
/// which navigation URL produced it.
pub const SHELL_KEY: &str = "/index.html";

/// Versioned icon path prefix; everything under it uses the icon cache.
pub const ICON_PATH_PREFIX: &str = "/assets/icons/";

/// Always fetched live: carries tenant-specific authorization and
/// visibility data, so a stale copy must never be served.
pub const TENANT_CONFIG_PATH: &str = "/config/panel.json";

/// Never cached in any path: API and proxy prefixes, the search index, the
/// tenant configuration resource, and a few dynamic endpoints. Entries
/// ending in `/` match as prefixes, the rest match exactly.
const DENYLIST: &[&str] = &[
    "/api/",
    "/rest/",
    "/auth/",
    "/live/",
    "/search-index.json",
    TENANT_CONFIG_PATH,
];

pub fn shell_cache_name(shell_version: &str) -> String {
    format!("panelhub-shell-{shell_version}")
}

pub fn icon_cache_name(icon_version: &str) -> String {
    format!("panelhub-icons-{icon_version}")
}

/// The versioned static assets installed into the app-shell cache. The
/// tenant configuration resource is deliberately absent.
pub fn shell_assets(shell_version: &str) -> Vec<String> {
    vec![
        "/index.html".to_string(),
        format!("/app.{shell_version}.js"),
        format!("/vendor.{shell_version}.js"),
        format!("/styles.{shell_version}.css"),
        "/manifest.json".to_string(),
        "/assets/icons/icon-192.png".to_string(),
        "/assets/icons/icon-512.png".to_string(),
    ]
}

/// An intercepted request, reduced to what classification needs.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Uppercase HTTP method.
    pub method: String,
    /// URL path without the query string; classification works on this.
    pub path: String,
    /// Raw query string. Ignored by classification, forwarded on network
    /// fetches and part of the cache key.
    pub query: Option<String>,
    pub same_origin: bool,
    /// Top-level document load, as opposed to a subresource fetch.
    pub navigation: bool,
    /// Caller headers to relay on network fetches (credentials, content
    /// negotiation). Ignored by classification and by cache keys.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A plain same-origin subresource GET.
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            query: None,
            same_origin: true,
            navigation: false,
            headers: Vec::new(),
        }
    }

    /// A same-origin top-level navigation.
    pub fn navigation(path: &str) -> Self {
        Self {
            navigation: true,
            ..Self::get(path)
        }
    }

    /// Path plus query string: what network fetches request and cache
    /// entries are keyed by.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// What the engine does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchClass {
    /// Not ours: forward untouched.
    Passthrough,
    /// Network first. Shell navigations refresh the cached shell and fall
    /// back to it; anything else gets the offline placeholder on failure.
    Navigation { shell: bool },
    /// Always network, never cache-read or cache-write.
    NetworkOnly,
    /// Serve cached if present, fetch-and-store otherwise.
    CacheFirst { icon: bool },
}

pub fn is_denylisted(path: &str) -> bool {
    DENYLIST.iter().any(|entry| {
        if entry.ends_with('/') {
            path.starts_with(entry)
        } else {
            path == *entry
        }
    })
}

/// True for the application shell itself: the root path or the shell
/// document.
pub fn is_shell_navigation(path: &str) -> bool {
    matches!(path, "/" | "/index.html")
}

pub fn classify(request: &FetchRequest) -> FetchClass {
    if request.method != "GET" || !request.same_origin {
        return FetchClass::Passthrough;
    }
    if request.navigation {
        return FetchClass::Navigation {
            shell: is_shell_navigation(&request.path),
        };
    }
    if is_denylisted(&request.path) {
        return FetchClass::NetworkOnly;
    }
    FetchClass::CacheFirst {
        icon: request.path.starts_with(ICON_PATH_PREFIX),
    }
}
