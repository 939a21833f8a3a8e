//! HTTP routes for the IAP proxy.
//!
//! Defines the Axum router and application state.

use crate::auth::{KeyProvider, TokenVerifier};
use crate::config::Config;
use crate::errors::ProxyError;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_iap_assertion, AuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Whole-request timeout, upstream time included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout for the upstream.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Assertion verifier shared by the gate and the readiness probe.
    pub verifier: Arc<TokenVerifier>,

    /// Client used to forward requests upstream.
    pub http_client: reqwest::Client,

    /// Base URL requests are forwarded to.
    pub upstream_url: Url,
}

impl AppState {
    /// Create application state from configuration and a key provider.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Internal` if the upstream HTTP client cannot be built.
    pub fn new(config: Config, keys: Arc<dyn KeyProvider>) -> Result<Self, ProxyError> {
        let verifier = Arc::new(TokenVerifier::new(
            keys,
            config.iap_audience.clone(),
            Duration::from_secs(config.jwt_clock_skew_seconds),
        ));

        // Redirects are the client's to follow, not ours
        let http_client = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream client: {e}")))?;

        let upstream_url = config.upstream_url.clone();

        Ok(Self {
            config,
            verifier,
            http_client,
            upstream_url,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/_liveness` - Liveness probe, no assertion required
/// - `/_readiness` - Readiness probe with key cache state, no assertion required
/// - `/_metrics` - Prometheus metrics endpoint, no assertion required
/// - everything else - proxied upstream behind the assertion gate
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 60 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState::new(
        state.verifier.clone(),
        &state.config.unauthenticated_paths,
    ));

    // Operational routes (never gated)
    let public_routes = Router::new()
        .route("/_liveness", get(handlers::liveness_check))
        .route("/_readiness", get(handlers::readiness_check))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/_metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Every other path and method is gated, then proxied
    let proxied_routes = Router::new()
        .fallback(handlers::proxy)
        .layer(middleware::from_fn_with_state(
            auth_state,
            require_iap_assertion,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(proxied_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
