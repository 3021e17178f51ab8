//! Header sieve
//!
//! Three forwarding profiles. Exclusion lists match case-insensitively;
//! overlays insert with the given name. The `x-ccf-*`/`x-ccfallback-*`
//! control headers never leave the gateway.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Hop-by-hop and transport headers never forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Dropped on top of hop-by-hop for every upstream call.
const INBOUND_EXTRA: &[&str] = &["accept-encoding"];

/// Client credentials, additionally dropped when the provider injects its
/// own key.
const CLIENT_CREDENTIALS: &[&str] = &["x-api-key", "authorization"];

/// Dropped from upstream responses before they reach the client.
const RESPONSE_DROP: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "upgrade",
    "host",
];

/// Gateway control header prefixes (token, debug routing, legacy alias).
fn is_internal(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("x-ccf-") || lower.starts_with("x-ccfallback-")
}

fn in_list(list: &[&str], name: &str) -> bool {
    list.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Headers forwarded to the primary: the client keeps its own credentials.
pub fn sieve_primary(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !in_list(HOP_BY_HOP_HEADERS, name) && !in_list(INBOUND_EXTRA, name) && !is_internal(name)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Headers forwarded to a fallback provider: client credentials are dropped
/// before the provider's own credential is set.
pub fn sieve_provider(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !in_list(HOP_BY_HOP_HEADERS, name)
                && !in_list(INBOUND_EXTRA, name)
                && !in_list(CLIENT_CREDENTIALS, name)
                && !is_internal(name)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Headers forwarded from an upstream response back to the client.
pub fn sieve_response(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !in_list(RESPONSE_DROP, name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Overlay provider-configured static headers. Invalid names/values are
/// skipped with a warning rather than failing the request.
pub fn overlay(headers: &mut HeaderMap, extra: impl IntoIterator<Item = (String, String)>) {
    for (name, value) in extra {
        let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
            warn!(header = %name, "skipping invalid header name");
            continue;
        };
        let Ok(header_value) = HeaderValue::from_str(&value) else {
            warn!(header = %name, "skipping invalid header value");
            continue;
        };
        headers.insert(header_name, header_value);
    }
}

/// Set the provider credential. An `Authorization` auth header gets a
/// `Bearer ` prefix unless the key already carries one.
pub fn set_credential(headers: &mut HeaderMap, auth_header: &str, api_key: &str) {
    let value = if auth_header.eq_ignore_ascii_case("authorization")
        && !api_key.starts_with("Bearer ")
    {
        format!("Bearer {api_key}")
    } else {
        api_key.to_string()
    };

    let Ok(name) = HeaderName::try_from(auth_header.to_ascii_lowercase().as_str()) else {
        warn!(header = %auth_header, "invalid credential header name");
        return;
    };
    match HeaderValue::from_str(&value) {
        Ok(header_value) => {
            headers.insert(name, header_value);
        }
        Err(_) => warn!(header = %auth_header, "credential not representable as header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn primary_profile_keeps_client_credentials() {
        let headers = header_map(&[
            ("x-api-key", "sk-client"),
            ("authorization", "Bearer sk-client"),
            ("content-type", "application/json"),
            ("connection", "keep-alive"),
            ("accept-encoding", "gzip"),
            ("x-ccf-api-key", "ingress-token"),
            ("x-ccf-debug-skip-anthropic", "1"),
            ("x-ccfallback-debug-skip-anthropic", "1"),
        ]);
        let sieved = sieve_primary(&headers);

        assert_eq!(sieved.get("x-api-key").unwrap(), "sk-client");
        assert!(sieved.contains_key("authorization"));
        assert!(sieved.contains_key("content-type"));
        assert!(!sieved.contains_key("connection"));
        assert!(!sieved.contains_key("accept-encoding"));
        assert!(!sieved.contains_key("x-ccf-api-key"));
        assert!(!sieved.contains_key("x-ccf-debug-skip-anthropic"));
        assert!(!sieved.contains_key("x-ccfallback-debug-skip-anthropic"));
    }

    #[test]
    fn provider_profile_drops_client_credentials() {
        let headers = header_map(&[
            ("x-api-key", "sk-client"),
            ("authorization", "Bearer sk-client"),
            ("anthropic-version", "2023-06-01"),
        ]);
        let sieved = sieve_provider(&headers);

        assert!(!sieved.contains_key("x-api-key"));
        assert!(!sieved.contains_key("authorization"));
        assert_eq!(sieved.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn response_profile_drops_transport_headers() {
        let headers = header_map(&[
            ("content-length", "100"),
            ("content-encoding", "gzip"),
            ("transfer-encoding", "chunked"),
            ("content-type", "application/json"),
            ("anthropic-ratelimit-requests-remaining", "99"),
        ]);
        let sieved = sieve_response(&headers);

        assert!(!sieved.contains_key("content-length"));
        assert!(!sieved.contains_key("content-encoding"));
        assert!(!sieved.contains_key("transfer-encoding"));
        assert!(sieved.contains_key("content-type"));
        assert!(sieved.contains_key("anthropic-ratelimit-requests-remaining"));
    }

    #[test]
    fn sieve_is_idempotent() {
        let headers = header_map(&[
            ("x-api-key", "sk"),
            ("connection", "close"),
            ("content-type", "application/json"),
        ]);
        let once = sieve_provider(&headers);
        let twice = sieve_provider(&once);
        assert_eq!(once, twice);

        let response_once = sieve_response(&headers);
        assert_eq!(sieve_response(&response_once), response_once);
    }

    #[test]
    fn overlay_inserts_and_replaces() {
        let mut headers = header_map(&[("anthropic-version", "2023-01-01")]);
        overlay(
            &mut headers,
            [
                ("anthropic-version".to_string(), "2023-06-01".to_string()),
                ("x-title".to_string(), "gateway".to_string()),
                ("bad header".to_string(), "x".to_string()),
            ],
        );
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert_eq!(headers.get("x-title").unwrap(), "gateway");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn credential_uses_named_header() {
        let mut headers = HeaderMap::new();
        set_credential(&mut headers, "x-api-key", "sk-prov");
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-prov");
    }

    #[test]
    fn authorization_credential_gets_bearer_prefix() {
        let mut headers = HeaderMap::new();
        set_credential(&mut headers, "Authorization", "sk-prov");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-prov");

        let mut headers = HeaderMap::new();
        set_credential(&mut headers, "Authorization", "Bearer sk-prov");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-prov");
    }
}
