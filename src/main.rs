use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slidegate::config::AppConfig;
use slidegate::http::HttpServer;
use slidegate::ratelimit::RateLimiter;
use slidegate::store;

/// Sliding log rate limiting in front of HTTP routes.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "SLIDEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Store URL (redis://host:port or memory://), overrides the configuration
    #[arg(long)]
    store_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Slidegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(url) = args.store_url {
        config.store.url = url;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    // Connect before serving; the handle is shared by every route.
    let store = store::connect(&config.store.url, config.store.connect_timeout()).await?;

    let rate_limiter = Arc::new(RateLimiter::new(store.clone()));
    info!("Rate limiter initialized");

    let server = HttpServer::new(
        config.server.listen_addr,
        rate_limiter,
        store.clone(),
        config.routes,
    )
    .trust_proxy(config.server.trust_proxy);

    server.serve_with_shutdown(shutdown_signal()).await?;

    store.close().await;
    info!("Slidegate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
