//! Anthropic Fallback Gateway
//!
//! Single-binary Rust service that:
//! 1. Accepts Anthropic Messages API requests at /v1/messages
//! 2. Forwards them to api.anthropic.com with the client's credentials
//! 3. Fails over to configured fallback providers on retriable errors
//! 4. Serves the admin API for providers, tokens, and breaker state

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::config::{Bootstrap, DEFAULT_COOLDOWN_SECS};
use gateway::{AppState, build_router, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting anthropic-fallback-gateway");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Bootstrap::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let bootstrap = Bootstrap::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let debug_enabled = std::env::var("DEBUG").is_ok_and(|v| !v.is_empty());
    let default_cooldown_secs = std::env::var("COOLDOWN_DURATION")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_COOLDOWN_SECS);
    let admin_token = std::env::var("ADMIN_TOKEN")
        .ok()
        .filter(|token| !token.is_empty())
        .map(|token| Arc::new(common::Secret::new(token)));
    if admin_token.is_none() {
        warn!("ADMIN_TOKEN not set, admin API is disabled");
    }

    let store = kvstore::FileStore::load(bootstrap.server.state_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open state file {}",
                bootstrap.server.state_path.display()
            )
        })?;

    info!(
        listen_addr = %bootstrap.server.listen_addr,
        upstream_url = %bootstrap.proxy.upstream_url,
        debug = debug_enabled,
        cooldown_secs = default_cooldown_secs,
        "configuration loaded"
    );

    let state = AppState {
        store: Arc::new(store),
        client: reqwest::Client::new(),
        admin_token,
        debug: debug_enabled,
        default_cooldown_secs,
        primary_url: bootstrap.proxy.upstream_url.clone(),
    };

    let metrics_handle = metrics::install_recorder();
    let app = build_router(state, Some(metrics_handle));

    let listener = TcpListener::bind(bootstrap.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bootstrap.server.listen_addr))?;

    info!(addr = %bootstrap.server.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
