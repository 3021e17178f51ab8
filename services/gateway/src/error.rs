//! Service-specific error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] kvstore::Error),

    #[error("Breaker error: {0}")]
    Breaker(#[from] breaker::Error),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Build a proxy-originated Anthropic-shaped error response:
/// `{error:{type, message}}`.
pub fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        json!({"error": {"type": error_type, "message": message}}).to_string(),
    )
        .into_response()
}
