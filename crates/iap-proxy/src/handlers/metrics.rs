//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! Served without an assertion so Prometheus can scrape it. Labels are
//! bounded and carry no user identity.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /_metrics
///
/// Returns Prometheus text format:
/// ```text
/// # TYPE iap_token_verifications_total counter
/// iap_token_verifications_total{outcome="rejected",reason="expired"} 3
/// ```
#[tracing::instrument(skip_all, name = "iap.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
