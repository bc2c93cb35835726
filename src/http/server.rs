//! HTTP server implementation.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::RateLimitLayer;
use crate::error::Result;
use crate::ratelimit::{RateLimitOptions, RateLimiter};
use crate::store::WindowStore;

/// HTTP server exposing the rate limited routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Store handle, for health reporting
    store: Arc<dyn WindowStore>,
    /// Route path to rate limit rule
    routes: BTreeMap<String, RateLimitOptions>,
    trust_proxy: bool,
}

impl HttpServer {
    pub fn new(
        addr: SocketAddr,
        rate_limiter: Arc<RateLimiter>,
        store: Arc<dyn WindowStore>,
        routes: BTreeMap<String, RateLimitOptions>,
    ) -> Self {
        Self {
            addr,
            rate_limiter,
            store,
            routes,
            trust_proxy: false,
        }
    }

    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// Build the router: `/` and `/health` are never rate limited, every
    /// configured route sits behind its own [`RateLimitLayer`].
    pub fn router(&self) -> Router {
        let store = self.store.clone();
        let mut router = Router::new()
            .route("/", get(|| async { "Welcome to rate limiter example" }))
            .route(
                "/health",
                get(move || {
                    let store = store.clone();
                    async move {
                        match store.ping().await {
                            Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
                            Err(e) => (
                                StatusCode::SERVICE_UNAVAILABLE,
                                Json(json!({ "status": "unavailable", "error": e.to_string() })),
                            ),
                        }
                    }
                }),
            );

        for (path, options) in &self.routes {
            let layer = RateLimitLayer::new(self.rate_limiter.clone(), options.clone())
                .trust_proxy(self.trust_proxy);
            let limited = Router::new()
                .route(path, get(|| async { "Rate limiter example" }))
                .route_layer(layer);
            router = router.merge(limited);
            info!(path = %path, window_ms = options.window_ms, "Mounted rate limited route");
        }

        router
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests have drained.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
