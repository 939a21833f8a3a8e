//! Metrics definitions for the IAP proxy.
//!
//! All metrics follow Prometheus naming conventions:
//! - `iap_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: standard HTTP methods, anything else is `OTHER`
//! - `endpoint`: the three operational paths, everything else is `/proxy`
//! - `outcome`: accepted, rejected
//! - `reason`: bounded by `VerifyError` variants
//! - `status`: bounded by code

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // End-to-end request latency, including upstream time
        .set_buckets_for_metric(
            Matcher::Prefix("iap_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Key fetches are bounded by the fetch timeout (max 30s)
        .set_buckets_for_metric(
            Matcher::Prefix("iap_key_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set key fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `iap_http_requests_total`, `iap_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures every response including 401 rejections and framework errors.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let method = normalize_method(method);
    let endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("iap_http_request_duration_seconds",
        "method" => method,
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("iap_http_requests_total",
        "method" => method,
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code for simplified querying
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=399 => "success",
        401 => "unauthorized",
        408 | 504 => "timeout",
        502 => "bad_gateway",
        _ => "error",
    }
}

/// Collapse request paths to a bounded label set.
///
/// Proxied paths belong to the upstream and are unbounded, so they share
/// one label.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/_liveness" => "/_liveness",
        "/_readiness" => "/_readiness",
        "/_metrics" => "/_metrics",
        _ => "/proxy",
    }
}

fn normalize_method(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "PATCH" => "PATCH",
        "DELETE" => "DELETE",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

// ============================================================================
// Token Verification Metrics
// ============================================================================

/// Record the outcome of one assertion verification.
///
/// Metric: `iap_token_verifications_total`
/// Labels: `outcome` (accepted, rejected), `reason` (`none` when accepted)
pub fn record_token_verification(outcome: &'static str, reason: &'static str) {
    counter!("iap_token_verifications_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

// ============================================================================
// Key Fetch Metrics
// ============================================================================

/// Record one fetch of the public key endpoint.
///
/// Metric: `iap_key_fetches_total`, `iap_key_fetch_duration_seconds`
/// Labels: `status` (success, network_error, decode_error)
pub fn record_key_fetch(status: &'static str, duration: Duration) {
    histogram!("iap_key_fetch_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("iap_key_fetches_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Upstream Metrics
// ============================================================================

/// Record one forwarded request.
///
/// Metric: `iap_upstream_requests_total`
/// Labels: `status` (2xx, 3xx, 4xx, 5xx, or `error` when no response)
pub fn record_upstream_request(status_code: Option<u16>) {
    let status = match status_code {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(_) => "5xx",
        None => "error",
    };

    counter!("iap_upstream_requests_total",
        "status" => status
    )
    .increment(1);
}
