//! Hub configuration.
//!
//! Three equivalent ways to configure the hub, later layers winning:
//!
//! 1. Built-in defaults.
//! 2. A TOML file: `--config <path>`, or `panelhub.toml` in the working
//!    directory.
//! 3. `PANELHUB_*` environment variables, with double-underscore nesting
//!    into sections:
//!    `PANELHUB_SERVER__PORT=9000`  →  `server.port = 9000`
//!    `PANELHUB_UPSTREAM__ORIGIN=http://ha.local:8123`  →  `upstream.origin`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "panelhub.toml";

/// Everything the hub reads from its config file and environment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub log: LogSection,
}

/// Bind address knobs (lives under `[server]` in panelhub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Backend location (lives under `[upstream]` in panelhub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamSection {
    /// Origin the cache engine and the passthrough proxy fetch from.
    #[serde(default = "default_origin")]
    pub origin: String,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            origin: default_origin(),
        }
    }
}

/// Cache version tokens (lives under `[cache]` in panelhub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSection {
    /// Build version embedded in the app-shell cache name and asset URLs.
    #[serde(default = "default_version")]
    pub shell_version: String,
    /// Icon set version; bumped far less often than the shell.
    #[serde(default = "default_version")]
    pub icon_version: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            shell_version: default_version(),
            icon_version: default_version(),
        }
    }
}

/// Logging (lives under `[log]` in panelhub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogSection {
    /// Default `tracing` filter directive; `RUST_LOG` still wins.
    #[serde(default = "default_directive")]
    pub directive: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            directive: default_directive(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8790
}
fn default_origin() -> String {
    "http://127.0.0.1:8123".to_string()
}
fn default_version() -> String {
    "dev".to_string()
}
fn default_directive() -> String {
    "panelhub=info,tower_http=info,warn".to_string()
}

/// Build a figment that layers: defaults → TOML file → PANELHUB_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PANELHUB_CACHE__SHELL_VERSION=20240811`  →  `cache.shell_version`
pub fn load_config(config_file: Option<&Path>) -> Figment {
    let file = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(HubConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("PANELHUB_").split("__"))
}
