//! Configuration management for Slidegate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SlidegateError};
use crate::ratelimit::{OverrideSpec, RateLimitOptions};

/// Prefix for environment overrides, e.g. `SLIDEGATE__STORE__URL`.
pub const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for the Slidegate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limited routes, keyed by path
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, RateLimitOptions>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            routes: default_routes(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable behind a reverse proxy that overwrites these headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1212))
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL (`redis://` or `memory://`)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout() -> u64 {
    10_000
}

/// The demonstration route table: one anonymous and one tiered route, both
/// with an `override` event that lifts the limit to 10 for a minute.
fn default_routes() -> BTreeMap<String, RateLimitOptions> {
    let promo = || OverrideSpec::new(10, ["override"], 60_000);

    let mut routes = BTreeMap::new();
    routes.insert(
        "/unauthenticated".to_string(),
        RateLimitOptions::builder(60_000)
            .limit(5)
            .override_spec(promo())
            .build(),
    );
    routes.insert(
        "/authenticated".to_string(),
        RateLimitOptions::builder(60_000)
            .tiered(5, 10)
            .override_spec(promo())
            .build(),
    );
    routes
}

/// The parts of [`AppConfig`] that environment variables may override.
///
/// Routes stay out of it: the `config` crate lowercases table keys, which
/// would rename a path like `/Auth`.
#[derive(Debug, Deserialize)]
struct LayeredSettings {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Debug, Deserialize)]
struct RouteTable {
    #[serde(default = "default_routes")]
    routes: BTreeMap<String, RateLimitOptions>,
}

impl AppConfig {
    /// Load configuration from an optional YAML file plus `SLIDEGATE__*`
    /// environment variables, which take precedence for `server` and `store`.
    ///
    /// Routes are read from the file as written.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let mut routes = default_routes();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            let contents = std::fs::read_to_string(path)?;
            if !contents.trim().is_empty() {
                let table: RouteTable = serde_yaml::from_str(&contents)
                    .map_err(|e| SlidegateError::Config(e.to_string()))?;
                routes = table.routes;
            }
            builder = builder.add_source(config::File::from_str(
                &contents,
                config::FileFormat::Yaml,
            ));
        }

        let settings: LayeredSettings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        let config = AppConfig {
            server: settings.server,
            store: settings.store,
            routes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.connect_timeout_ms == 0 {
            return Err(SlidegateError::Config(
                "store.connect_timeout_ms must be positive".to_string(),
            ));
        }

        for (path, options) in &self.routes {
            if !path.starts_with('/') {
                return Err(SlidegateError::Config(format!(
                    "route {} must start with '/'",
                    path
                )));
            }
            options
                .validate()
                .map_err(|e| SlidegateError::Config(format!("route {}: {}", path, e)))?;
        }

        Ok(())
    }
}
