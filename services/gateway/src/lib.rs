//! Anthropic fallback gateway
//!
//! Drop-in reverse proxy for the Anthropic Messages API. Requests go to the
//! primary upstream first; on retriable failure they walk an ordered chain
//! of fallback providers, with per-provider circuit breaking, Anthropic↔
//! OpenAI translation, and error-driven request rectification.

pub mod admin;
pub mod attempt;
pub mod auth;
pub mod config;
pub mod error;
pub mod headers;
pub mod metrics;
pub mod proxy;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn kvstore::KvStore>,
    pub client: reqwest::Client,
    pub admin_token: Option<Arc<common::Secret<String>>>,
    /// DEBUG env flag: forces breaker availability, verbose routing logs
    pub debug: bool,
    /// COOLDOWN_DURATION env default, used when the store has no setting
    pub default_cooldown_secs: u64,
    /// Primary upstream base URL (bootstrap `proxy.upstream_url`)
    pub primary_url: String,
}

/// Build the full ingress + admin router.
pub fn build_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/", get(proxy::health))
        .route("/v1/messages", post(proxy::handle_messages))
        .merge(admin::build_admin_router());

    if let Some(handle) = metrics_handle {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router.with_state(state)
}
