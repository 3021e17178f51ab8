//! Ingress and admin authentication

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::config::TokenEntry;

/// Ingress token header.
pub const CLIENT_TOKEN_HEADER: &str = "x-ccf-api-key";

/// Check the ingress allow-list.
///
/// An empty allow-list permits unauthenticated access. Tokens are compared
/// via SHA-256 digests so the comparison does not branch on token bytes or
/// leak the match length.
pub fn client_authorized(headers: &HeaderMap, allowed: &[TokenEntry]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(presented) = headers
        .get(CLIENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let presented_digest = Sha256::digest(presented.as_bytes());
    allowed
        .iter()
        .any(|entry| Sha256::digest(entry.token.as_bytes()) == presented_digest)
}

/// Check admin credentials: `Authorization: Bearer <token>` or `?token=`.
pub fn admin_authorized(
    headers: &HeaderMap,
    query_token: Option<&str>,
    admin_token: Option<&common::Secret<String>>,
) -> bool {
    // No configured token means the admin surface is closed entirely
    let Some(admin_token) = admin_token else {
        return false;
    };
    let expected = Sha256::digest(admin_token.expose().as_bytes());

    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    [bearer, query_token]
        .into_iter()
        .flatten()
        .any(|candidate| Sha256::digest(candidate.as_bytes()) == expected)
}
