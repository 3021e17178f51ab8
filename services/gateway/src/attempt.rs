//! One provider attempt
//!
//! Builds the upstream request for a single fallback provider (model
//! mapping, optional OpenAI translation, header construction, credential),
//! dispatches it with bounded transport retries, and runs the error-driven
//! rectifier loop. A rectified retry recurses with a mutated copy of the
//! original body and the rule's one-shot flag set, so no rule can fire twice
//! within one attempt.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use rectifier::{Rule, RectifierConfig, extract_error_message};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, ProviderFormat};
use crate::headers::{overlay, set_credential, sieve_provider, sieve_response};
use crate::metrics;

/// Hard per-attempt timeout, covering streamed bodies as well.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay of the transport retry backoff (doubles per retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// One-shot markers for the rectifier rules within a single attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryFlags {
    thinking_signature: bool,
    thinking_budget: bool,
    tool_results: bool,
}

impl RetryFlags {
    fn used(&self, rule: Rule) -> bool {
        match rule {
            Rule::ThinkingSignature => self.thinking_signature,
            Rule::ThinkingBudget => self.thinking_budget,
            Rule::ToolResultPairing => self.tool_results,
        }
    }

    fn with(mut self, rule: Rule) -> Self {
        match rule {
            Rule::ThinkingSignature => self.thinking_signature = true,
            Rule::ThinkingBudget => self.thinking_budget = true,
            Rule::ToolResultPairing => self.tool_results = true,
        }
        self
    }
}

/// A captured non-OK upstream response, replayable to the client.
#[derive(Debug)]
pub struct UpstreamError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Terminal failure of one provider attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// The provider answered with a non-2xx response (retries and
    /// rectification exhausted).
    Upstream(UpstreamError),
    /// No response at all: connect failure, reset, or timeout.
    Network(String),
}

impl AttemptError {
    /// Coarse label for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AttemptError::Upstream(_) => "upstream_status",
            AttemptError::Network(_) => "network",
        }
    }
}

/// Run one provider attempt end to end.
///
/// `body` is the client's Anthropic-shaped request. On success the returned
/// response is already Anthropic-shaped (translated when the provider speaks
/// OpenAI) with cleaned headers, streaming bodies passed through without
/// materialization.
pub async fn try_provider(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    body: &Value,
    client_headers: &HeaderMap,
    rectifier_config: &RectifierConfig,
    flags: RetryFlags,
) -> Result<Response, AttemptError> {
    let mut outbound = body.clone();
    if let Some(model) = outbound.get("model").and_then(Value::as_str) {
        let mapped = provider.map_model(model).to_string();
        if mapped != model {
            if let Some(object) = outbound.as_object_mut() {
                object.insert("model".to_string(), Value::String(mapped));
            }
        }
    }

    let wire_body = match provider.format {
        ProviderFormat::Openai => {
            bridge::anthropic_to_openai(&outbound, provider.wants_schema_cleanup())
        }
        ProviderFormat::Anthropic => outbound,
    };
    let payload =
        serde_json::to_vec(&wire_body).map_err(|e| AttemptError::Network(e.to_string()))?;

    let mut headers = sieve_provider(client_headers);
    overlay(
        &mut headers,
        provider.headers.iter().map(|(k, v)| (k.clone(), v.clone())),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    set_credential(&mut headers, &provider.auth_header, &provider.api_key);

    let response = send_with_retries(client, provider, headers, payload).await?;

    if response.status().is_success() {
        return Ok(success_response(provider, body, response).await?);
    }

    // Non-OK: capture the response, then let the rectifier decide whether a
    // mutated retry is worth one more round trip.
    let status = response.status();
    let response_headers = sieve_response(response.headers());
    let error_body = response.bytes().await.unwrap_or_default();

    if provider.format == ProviderFormat::Anthropic && rectifier_config.enabled {
        let message = extract_error_message(&String::from_utf8_lossy(&error_body));
        for rule in Rule::ALL {
            if flags.used(rule) || !rectifier_config.allows(rule) || !rule.detects(&message) {
                continue;
            }
            let mut mutated = body.clone();
            if rectifier::apply(rule, &mut mutated, &message) {
                debug!(provider = %provider.name, ?rule, "rectified request, retrying");
                return Box::pin(try_provider(
                    client,
                    provider,
                    &mutated,
                    client_headers,
                    rectifier_config,
                    flags.with(rule),
                ))
                .await;
            }
            // Detector matched but the body was already in the target shape:
            // a retry would replay the same error.
            debug!(provider = %provider.name, ?rule, "rectifier matched but nothing to change");
            break;
        }
    }

    Err(AttemptError::Upstream(UpstreamError {
        status,
        headers: response_headers,
        body: error_body,
    }))
}

/// POST the payload, retrying network errors and 5xx up to `provider.retry`
/// times with exponential backoff. A final 5xx is returned as a response so
/// the caller captures its body.
async fn send_with_retries(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    headers: HeaderMap,
    payload: Vec<u8>,
) -> Result<reqwest::Response, AttemptError> {
    let mut attempt: u32 = 0;
    loop {
        let result = client
            .post(&provider.base_url)
            .timeout(UPSTREAM_TIMEOUT)
            .headers(headers.clone())
            .body(payload.clone())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_server_error() && attempt < provider.retry => {
                warn!(
                    provider = %provider.name,
                    status = response.status().as_u16(),
                    attempt,
                    "server error, retrying"
                );
                metrics::record_provider_failure(&provider.name, "upstream_status");
            }
            Ok(response) => return Ok(response),
            Err(e) if attempt < provider.retry => {
                warn!(provider = %provider.name, error = %e, attempt, "network error, retrying");
                metrics::record_provider_failure(&provider.name, "network");
            }
            Err(e) => return Err(AttemptError::Network(e.to_string())),
        }

        attempt += 1;
        let delay = RETRY_BASE_DELAY_MS * (1u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Build the client-facing response for a successful upstream call.
async fn success_response(
    provider: &ProviderConfig,
    request_body: &Value,
    response: reqwest::Response,
) -> Result<Response, AttemptError> {
    let status = response.status();
    let headers = sieve_response(response.headers());

    let body = match provider.format {
        ProviderFormat::Anthropic => Body::from_stream(response.bytes_stream()),
        ProviderFormat::Openai => {
            let streaming = request_body.get("stream").and_then(Value::as_bool) == Some(true);
            if streaming {
                Body::from_stream(bridge::translate_sse(response.bytes_stream()))
            } else {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AttemptError::Network(e.to_string()))?;
                let parsed: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    AttemptError::Network(format!("unparseable provider response: {e}"))
                })?;
                let translated = bridge::openai_to_anthropic(&parsed);
                Body::from(translated.to_string())
            }
        }
    };

    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    if provider.format == ProviderFormat::Openai {
        // Translated non-stream bodies are fresh JSON; streams keep the
        // upstream SSE content type.
        if request_body.get("stream").and_then(Value::as_bool) != Some(true) {
            out.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
    }
    Ok(out)
}
