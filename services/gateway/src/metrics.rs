//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `status`, `provider`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_provider_failures_total` (counter): labels `provider`, `reason`
//! - `gateway_failovers_total` (counter): no labels

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `gateway_request_duration_seconds` with explicit buckets so it
/// renders as a histogram (`_bucket` lines) rather than a summary. The range
/// covers sub-10ms breaker skips up to the 30s upstream timeout.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request: final status, which upstream served it
/// ("anthropic-primary", a provider name, or "none").
pub fn record_request(status: u16, provider: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "provider" => provider.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a provider failure with a coarse reason label
/// ("network", "timeout", "upstream_status").
pub fn record_provider_failure(provider: &str, reason: &str) {
    metrics::counter!("gateway_provider_failures_total", "provider" => provider.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record that a request fell past the primary into the fallback chain.
pub fn record_failover() {
    metrics::counter!("gateway_failovers_total").increment(1);
}
