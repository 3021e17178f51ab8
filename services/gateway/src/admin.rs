//! Admin API
//!
//! Thin handlers over the key-value store, bearer-authenticated against
//! `ADMIN_TOKEN` (header or `?token=` query). Every mutation is visible to
//! the very next proxied request because the routing engine re-reads the
//! store per request.
//!
//! Endpoints:
//! - GET/POST /admin/config            : provider chain (keys masked on GET)
//! - GET/POST /admin/tokens            : ingress allow-list
//! - GET/POST /admin/settings          : cooldown duration
//! - GET/POST /admin/anthropic-status  : primary disabled flag
//! - GET /admin/provider-states        : breaker observability
//! - POST /admin/provider-states/{name}/reset
//! - GET/POST /admin/rectifier         : rectifier switches
//! - POST /admin/test-provider         : live probe across the test models

use std::sync::OnceLock;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use breaker::CircuitBreaker;
use futures_util::future::join_all;
use rectifier::RectifierConfig;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::AppState;
use crate::attempt::{AttemptError, RetryFlags, try_provider};
use crate::auth;
use crate::config::{ProviderConfig, TokenEntry};
use crate::error::error_response;

/// Models probed by POST /admin/test-provider.
const TEST_MODELS: [&str; 4] = [
    "claude-opus-4-1-20250805",
    "claude-sonnet-4-5-20250929",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
];

/// Per-model probe timeout.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Allowed characters for a token note.
fn note_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9 -]*$").expect("valid regex"))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminQuery {
    token: Option<String>,
}

/// Build the admin router (state applied by the caller).
pub fn build_admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/config", get(get_config).post(set_config))
        .route("/admin/tokens", get(get_tokens).post(set_tokens))
        .route("/admin/settings", get(get_settings).post(set_settings))
        .route(
            "/admin/anthropic-status",
            get(get_anthropic_status).post(set_anthropic_status),
        )
        .route("/admin/provider-states", get(get_provider_states))
        .route(
            "/admin/provider-states/{name}/reset",
            post(reset_provider_state),
        )
        .route("/admin/rectifier", get(get_rectifier).post(set_rectifier))
        .route("/admin/test-provider", post(test_provider))
}

fn ensure_admin(
    state: &AppState,
    headers: &HeaderMap,
    query: &AdminQuery,
) -> Result<(), Response> {
    let authorized = auth::admin_authorized(
        headers,
        query.token.as_deref(),
        state.admin_token.as_deref(),
    );
    if authorized {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "admin token required",
        ))
    }
}

async fn stored_providers(state: &AppState) -> Vec<ProviderConfig> {
    let raw = state.store.get("providers").await.ok().flatten();
    crate::config::parse_providers(raw)
}

// --- providers ----------------------------------------------------------

/// GET /admin/config : provider list with keys masked.
async fn get_config(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let masked: Vec<Value> = stored_providers(&state)
        .await
        .iter()
        .map(|provider| {
            let mut value = serde_json::to_value(provider).unwrap_or(Value::Null);
            if let Some(object) = value.as_object_mut() {
                object.insert("apiKey".to_string(), json!("***"));
            }
            value
        })
        .collect();
    axum::Json(masked).into_response()
}

/// POST /admin/config : replace the provider chain.
///
/// A masked `"***"` key keeps the stored key of the same-named provider so a
/// GET→edit→POST round trip cannot wipe credentials.
async fn set_config(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let Some(entries) = body.as_array() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "proxy_error",
            "expected a JSON array of providers",
        );
    };

    let mut providers: Vec<ProviderConfig> = Vec::with_capacity(entries.len());
    for entry in entries {
        let provider: ProviderConfig = match serde_json::from_value(entry.clone()) {
            Ok(provider) => provider,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "proxy_error",
                    &format!("unparseable provider entry: {e}"),
                );
            }
        };
        providers.push(provider);
    }

    let stored = stored_providers(&state).await;
    for provider in &mut providers {
        if provider.api_key == "***" {
            match stored.iter().find(|p| p.name == provider.name) {
                Some(existing) => provider.api_key = existing.api_key.clone(),
                None => provider.api_key.clear(),
            }
        }
        if let Err(reason) = provider.validate() {
            return error_response(StatusCode::BAD_REQUEST, "proxy_error", &reason);
        }
    }

    let serialized = match serde_json::to_string(&providers) {
        Ok(serialized) => serialized,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("failed to serialize providers: {e}"),
            );
        }
    };
    if let Err(e) = state.store.put("providers", serialized, None).await {
        return store_failure(e);
    }

    info!(providers = providers.len(), "provider chain updated");
    axum::Json(json!({"ok": true, "count": providers.len()})).into_response()
}

// --- tokens -------------------------------------------------------------

async fn get_tokens(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let raw = state.store.get("allowed_tokens").await.ok().flatten();
    let tokens: Vec<TokenEntry> = raw
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    axum::Json(tokens).into_response()
}

async fn set_tokens(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(tokens): axum::Json<Vec<TokenEntry>>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    for entry in &tokens {
        if entry.token.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "proxy_error", "empty token");
        }
        if let Some(note) = &entry.note {
            if !note_pattern().is_match(note) {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "proxy_error",
                    "note may only contain letters, digits, spaces, and dashes",
                );
            }
        }
    }

    let serialized = serde_json::to_string(&tokens).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = state.store.put("allowed_tokens", serialized, None).await {
        return store_failure(e);
    }
    info!(tokens = tokens.len(), "allow-list updated");
    axum::Json(json!({"ok": true, "count": tokens.len()})).into_response()
}

// --- settings -----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    cooldown_duration: u64,
}

async fn get_settings(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let seconds = state
        .store
        .get("cooldown_duration")
        .await
        .ok()
        .flatten()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(state.default_cooldown_secs);
    axum::Json(json!({"cooldownDuration": seconds})).into_response()
}

async fn set_settings(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(settings): axum::Json<Settings>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    if let Err(e) = state
        .store
        .put(
            "cooldown_duration",
            settings.cooldown_duration.to_string(),
            None,
        )
        .await
    {
        return store_failure(e);
    }
    info!(cooldown = settings.cooldown_duration, "cooldown updated");
    axum::Json(json!({"ok": true})).into_response()
}

// --- anthropic primary flag ---------------------------------------------

#[derive(Debug, Deserialize)]
struct AnthropicStatus {
    disabled: bool,
}

async fn get_anthropic_status(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let disabled = state
        .store
        .get("anthropic_primary_disabled")
        .await
        .ok()
        .flatten()
        .map(|raw| raw.trim() == "true")
        .unwrap_or(false);
    axum::Json(json!({"disabled": disabled})).into_response()
}

async fn set_anthropic_status(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(status): axum::Json<AnthropicStatus>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    if let Err(e) = state
        .store
        .put(
            "anthropic_primary_disabled",
            status.disabled.to_string(),
            None,
        )
        .await
    {
        return store_failure(e);
    }
    info!(disabled = status.disabled, "primary flag updated");
    axum::Json(json!({"ok": true})).into_response()
}

// --- breaker observability ----------------------------------------------

async fn get_provider_states(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let breaker = CircuitBreaker::new(state.store.clone(), false);
    match breaker.all_states().await {
        Ok(states) => {
            let body: Vec<Value> = states
                .into_iter()
                .map(|(name, provider_state)| {
                    let mut value =
                        serde_json::to_value(&provider_state).unwrap_or(Value::Null);
                    if let Some(object) = value.as_object_mut() {
                        object.insert("name".to_string(), json!(name));
                    }
                    value
                })
                .collect();
            axum::Json(body).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "proxy_error",
            &format!("failed to read provider states: {e}"),
        ),
    }
}

async fn reset_provider_state(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let breaker = CircuitBreaker::new(state.store.clone(), false);
    match breaker.reset(&name).await {
        Ok(()) => {
            info!(provider = %name, "breaker state reset");
            axum::Json(json!({"ok": true, "name": name})).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "proxy_error",
            &format!("failed to reset provider state: {e}"),
        ),
    }
}

// --- rectifier ----------------------------------------------------------

async fn get_rectifier(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let config = state
        .store
        .get("rectifier_config")
        .await
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str::<RectifierConfig>(&raw).ok())
        .unwrap_or_default();
    axum::Json(config).into_response()
}

async fn set_rectifier(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(config): axum::Json<RectifierConfig>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    let serialized =
        serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
    if let Err(e) = state.store.put("rectifier_config", serialized, None).await {
        return store_failure(e);
    }
    info!(enabled = config.enabled, "rectifier config updated");
    axum::Json(json!({"ok": true})).into_response()
}

// --- provider test ------------------------------------------------------

/// POST /admin/test-provider : probe a candidate provider against the test
/// models, in parallel, without touching breaker state.
async fn test_provider(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    axum::Json(provider): axum::Json<ProviderConfig>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers, &query) {
        return denied;
    }
    if let Err(reason) = provider.validate() {
        return error_response(StatusCode::BAD_REQUEST, "proxy_error", &reason);
    }

    let probes = TEST_MODELS
        .iter()
        .map(|model| probe_model(&state, &provider, model));
    let results: Vec<Value> = join_all(probes).await;

    axum::Json(json!({"provider": provider.name, "results": results})).into_response()
}

async fn probe_model(state: &AppState, provider: &ProviderConfig, model: &str) -> Value {
    let body = json!({
        "model": model,
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "ping"}],
    });
    // Probes are diagnostic: no rectification, no client headers
    let rectifier = RectifierConfig {
        enabled: false,
        ..Default::default()
    };

    let outcome = tokio::time::timeout(
        TEST_TIMEOUT,
        try_provider(
            &state.client,
            provider,
            &body,
            &HeaderMap::new(),
            &rectifier,
            RetryFlags::default(),
        ),
    )
    .await;

    let mapped_model = provider.map_model(model);
    match outcome {
        Ok(Ok(response)) => json!({
            "model": model,
            "mappedModel": mapped_model,
            "ok": true,
            "status": response.status().as_u16(),
        }),
        Ok(Err(AttemptError::Upstream(upstream))) => {
            let detail = String::from_utf8_lossy(&upstream.body);
            json!({
                "model": model,
                "mappedModel": mapped_model,
                "ok": false,
                "status": upstream.status.as_u16(),
                "error": truncate(&detail, 300),
            })
        }
        Ok(Err(AttemptError::Network(error))) => json!({
            "model": model,
            "mappedModel": mapped_model,
            "ok": false,
            "error": error,
        }),
        Err(_) => json!({
            "model": model,
            "mappedModel": mapped_model,
            "ok": false,
            "error": format!("timeout after {}s", TEST_TIMEOUT.as_secs()),
        }),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

fn store_failure(error: kvstore::Error) -> Response {
    warn!(error = %error, "store write failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "proxy_error",
        "failed to persist configuration",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_pattern_accepts_and_rejects() {
        assert!(note_pattern().is_match(""));
        assert!(note_pattern().is_match("ci runner - staging 2"));
        assert!(!note_pattern().is_match("emoji ✨"));
        assert!(!note_pattern().is_match("semi;colon"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        let long = "é".repeat(400);
        let cut = truncate(&long, 301);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= 305);
    }
}
