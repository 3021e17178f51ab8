//! Routing engine
//!
//! One inbound Messages request walks this pipeline: ingress auth → config
//! snapshot → primary attempt → ordered fallback chain → exhaustion policy.
//! Provider attempts are strictly sequential; the breaker decides who gets
//! skipped, and every terminal outcome updates it.

use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use breaker::CircuitBreaker;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::attempt::{AttemptError, RetryFlags, UPSTREAM_TIMEOUT, UpstreamError, try_provider};
use crate::auth;
use crate::config::{AppConfig, ProviderConfig, load_app_config};
use crate::error::error_response;
use crate::headers::{sieve_primary, sieve_response};
use crate::metrics;

/// Breaker state key for the primary upstream.
pub const PRIMARY_BREAKER_NAME: &str = "anthropic-primary";

/// Debug routing header (and its legacy alias): skip the primary outright.
const DEBUG_SKIP_HEADER: &str = "x-ccf-debug-skip-anthropic";
const DEBUG_SKIP_HEADER_LEGACY: &str = "x-ccfallback-debug-skip-anthropic";

/// GET /: plain-text liveness with the configured fallback count.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let config =
        load_app_config(state.store.as_ref(), state.debug, state.default_cooldown_secs).await;
    let fallbacks = config.providers.iter().filter(|p| !p.disabled).count();
    format!("anthropic fallback gateway: {fallbacks} fallback provider(s) configured\n")
}

/// POST /v1/messages
pub async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let config =
        load_app_config(state.store.as_ref(), state.debug, state.default_cooldown_secs).await;

    if !auth::client_authorized(&headers, &config.allowed_tokens) {
        metrics::record_request(401, "none", started.elapsed().as_secs_f64());
        return error_response(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "invalid or missing x-ccf-api-key",
        );
    }

    let Ok(parsed) = serde_json::from_slice::<Value>(&body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "proxy_error",
            "request body is not valid JSON",
        );
    };

    let breaker = CircuitBreaker::new(state.store.clone(), config.debug);
    let skip_primary =
        header_flag(&headers, DEBUG_SKIP_HEADER) || header_flag(&headers, DEBUG_SKIP_HEADER_LEGACY);
    let primary_eligible = !skip_primary && !config.anthropic_primary_disabled;

    let mut last_upstream: Option<UpstreamError> = None;

    if primary_eligible {
        if breaker.is_available(PRIMARY_BREAKER_NAME).await.unwrap_or(true) {
            match call_primary(&state, &headers, body.clone()).await {
                PrimaryOutcome::Success(response) => {
                    let _ = breaker.mark_success(PRIMARY_BREAKER_NAME).await;
                    info!(request_id, provider = PRIMARY_BREAKER_NAME, "served by primary");
                    metrics::record_request(
                        response.status().as_u16(),
                        PRIMARY_BREAKER_NAME,
                        started.elapsed().as_secs_f64(),
                    );
                    return response;
                }
                PrimaryOutcome::ClientFatal(response) => {
                    // The request itself is bad; no fallback would fix it.
                    info!(
                        request_id,
                        status = response.status().as_u16(),
                        "primary client error, returned verbatim"
                    );
                    metrics::record_request(
                        response.status().as_u16(),
                        PRIMARY_BREAKER_NAME,
                        started.elapsed().as_secs_f64(),
                    );
                    return response;
                }
                PrimaryOutcome::Failover(captured) => {
                    let _ = breaker
                        .mark_failed(PRIMARY_BREAKER_NAME, config.max_cooldown_secs)
                        .await;
                    metrics::record_failover();
                    last_upstream = captured.or(last_upstream);
                }
            }
        } else {
            debug!(request_id, "primary breaker open, going to fallbacks");
            metrics::record_failover();
        }
    }

    let mut attempted_fallback = false;
    for provider in &config.providers {
        if provider.disabled {
            continue;
        }
        if !breaker.is_available(&provider.name).await.unwrap_or(true) {
            debug!(request_id, provider = %provider.name, "breaker open, skipping");
            continue;
        }
        attempted_fallback = true;
        if let Some(response) = attempt_provider(
            &state,
            &breaker,
            &config,
            provider,
            &parsed,
            &headers,
            &request_id,
            started,
            &mut last_upstream,
        )
        .await
        {
            return response;
        }
    }

    // Safety valve: when every fallback sat behind an open breaker, give the
    // one whose cooldown started earliest a single last-resort shot.
    if !attempted_fallback {
        let names: Vec<String> = config
            .providers
            .iter()
            .filter(|p| !p.disabled)
            .map(|p| p.name.clone())
            .collect();
        if !names.is_empty() {
            if let Ok(Some(pick)) = breaker.least_recently_failed(&names).await {
                info!(request_id, provider = %pick, "all breakers open, safety-valve attempt");
                if let Some(provider) = config.providers.iter().find(|p| p.name == pick) {
                    if let Some(response) = attempt_provider(
                        &state,
                        &breaker,
                        &config,
                        provider,
                        &parsed,
                        &headers,
                        &request_id,
                        started,
                        &mut last_upstream,
                    )
                    .await
                    {
                        return response;
                    }
                }
            }
        }
    }

    exhausted(
        &config,
        primary_eligible,
        last_upstream,
        &request_id,
        started,
    )
}

/// Try one fallback provider, updating breaker state and the captured error.
/// Returns the response to send when the provider succeeded.
#[allow(clippy::too_many_arguments)]
async fn attempt_provider(
    state: &AppState,
    breaker: &CircuitBreaker,
    config: &AppConfig,
    provider: &ProviderConfig,
    parsed: &Value,
    headers: &HeaderMap,
    request_id: &str,
    started: Instant,
    last_upstream: &mut Option<UpstreamError>,
) -> Option<Response> {
    match try_provider(
        &state.client,
        provider,
        parsed,
        headers,
        &config.rectifier,
        RetryFlags::default(),
    )
    .await
    {
        Ok(response) => {
            let _ = breaker.mark_success(&provider.name).await;
            info!(request_id, provider = %provider.name, "served by fallback");
            metrics::record_request(
                response.status().as_u16(),
                &provider.name,
                started.elapsed().as_secs_f64(),
            );
            Some(response)
        }
        Err(error) => {
            warn!(
                request_id,
                provider = %provider.name,
                reason = error.reason(),
                "fallback attempt failed"
            );
            metrics::record_provider_failure(&provider.name, error.reason());
            let _ = breaker
                .mark_failed(&provider.name, config.max_cooldown_secs)
                .await;
            if let AttemptError::Upstream(upstream) = error {
                *last_upstream = Some(upstream);
            }
            None
        }
    }
}

/// Exhaustion policy: replay the last upstream error when one exists,
/// otherwise synthesize a 502.
fn exhausted(
    config: &AppConfig,
    primary_eligible: bool,
    last_upstream: Option<UpstreamError>,
    request_id: &str,
    started: Instant,
) -> Response {
    if let Some(upstream) = last_upstream {
        warn!(
            request_id,
            status = upstream.status.as_u16(),
            "all providers failed, returning last upstream error"
        );
        metrics::record_request(
            upstream.status.as_u16(),
            "none",
            started.elapsed().as_secs_f64(),
        );
        let mut response = Response::new(Body::from(upstream.body));
        *response.status_mut() = upstream.status;
        *response.headers_mut() = upstream.headers;
        return response;
    }

    metrics::record_request(502, "none", started.elapsed().as_secs_f64());
    if !primary_eligible && config.providers.iter().all(|p| p.disabled) {
        return error_response(
            StatusCode::BAD_GATEWAY,
            "proxy_error",
            "primary disabled and no fallback providers configured",
        );
    }
    error_response(
        StatusCode::BAD_GATEWAY,
        "fallback_exhausted",
        "no provider could serve the request",
    )
}

enum PrimaryOutcome {
    /// 2xx, streamed through.
    Success(Response),
    /// 4xx the client must fix; returned verbatim, no fallback.
    ClientFatal(Response),
    /// Retriable at the chain level; body captured when the upstream
    /// answered at all.
    Failover(Option<UpstreamError>),
}

/// One attempt against the primary with the client's own credentials.
async fn call_primary(state: &AppState, headers: &HeaderMap, body: Bytes) -> PrimaryOutcome {
    let url = format!(
        "{}/v1/messages",
        state.primary_url.trim_end_matches('/')
    );
    let mut upstream_headers = sieve_primary(headers);
    upstream_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let result = state
        .client
        .post(&url)
        .timeout(UPSTREAM_TIMEOUT)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "primary network error");
            metrics::record_provider_failure(PRIMARY_BREAKER_NAME, "network");
            return PrimaryOutcome::Failover(None);
        }
    };

    let status = response.status();
    if status.is_success() {
        return PrimaryOutcome::Success(passthrough_response(response));
    }

    let code = status.as_u16();
    if code < 500 && !matches!(code, 401 | 403 | 429) {
        return PrimaryOutcome::ClientFatal(passthrough_response(response));
    }

    if matches!(code, 401 | 403) {
        // The client's own key was rejected; a fallback will silently
        // substitute its configured credentials.
        warn!(
            status = code,
            "primary rejected client credentials, failing over with provider credentials"
        );
    }
    metrics::record_provider_failure(PRIMARY_BREAKER_NAME, "upstream_status");

    let headers = sieve_response(response.headers());
    let body = response.bytes().await.unwrap_or_default();
    PrimaryOutcome::Failover(Some(UpstreamError {
        status,
        headers,
        body,
    }))
}

/// Stream an upstream response to the client, cleaning headers only.
fn passthrough_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = sieve_response(response.headers());
    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "1")
}
