//! Health check handlers.
//!
//! - `/_liveness`: returns OK while the process is serving
//! - `/_readiness`: reports readiness plus key cache state
//!
//! Both sit outside the assertion gate so probes need no token.

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Checks nothing beyond the process answering.
pub async fn liveness_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Always 200: keys are fetched lazily, so a cold cache does not stop the
/// proxy from serving. The cache state is reported for operators.
#[tracing::instrument(skip_all, name = "iap.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    let key_cache = if state.verifier.keys_warm().await {
        "warm"
    } else {
        tracing::debug!(target: "iap.health", "Key cache is cold");
        "cold"
    };

    Json(ReadinessResponse {
        status: "ready".to_string(),
        key_cache: key_cache.to_string(),
    })
}
