//! IAP assertion gate.
//!
//! Reads the `x-goog-iap-jwt-assertion` header, verifies it, and either
//! passes the request on unchanged or rejects it with an opaque 401.
//! Configured unauthenticated paths skip verification entirely.

use crate::auth::{TokenVerifier, VerifiedAssertion};
use crate::errors::ProxyError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the signed assertion.
pub const IAP_ASSERTION_HEADER: &str = "x-goog-iap-jwt-assertion";

/// State for the assertion gate.
#[derive(Clone)]
pub struct AuthState {
    /// Assertion verifier with its key provider.
    pub verifier: Arc<TokenVerifier>,

    /// Exact request paths forwarded without verification.
    pub unauthenticated_paths: Arc<HashSet<String>>,
}

impl AuthState {
    pub fn new(verifier: Arc<TokenVerifier>, unauthenticated_paths: &[String]) -> Self {
        Self {
            verifier,
            unauthenticated_paths: Arc::new(unauthenticated_paths.iter().cloned().collect()),
        }
    }

    fn is_unauthenticated(&self, path: &str) -> bool {
        self.unauthenticated_paths.contains(path)
    }
}

/// Gate middleware for proxied requests.
///
/// # Response
///
/// - Returns 401 Unauthorized if the assertion is absent or fails verification
/// - Otherwise continues with `VerifiedAssertion` in request extensions; the
///   forwarded request itself is not modified
#[instrument(skip_all, name = "iap.middleware.auth")]
pub async fn require_iap_assertion(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    if state.is_unauthenticated(req.uri().path()) {
        tracing::debug!(target: "iap.middleware.auth", path = %req.uri().path(), "Unauthenticated path, skipping verification");
        return Ok(next.run(req).await);
    }

    // Absent and non-UTF-8 headers both verify as a missing token
    let token = req
        .headers()
        .get(IAP_ASSERTION_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match state.verifier.verify(&token).await {
        Ok(assertion) => {
            req.extensions_mut().insert(assertion);
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::warn!(
                target: "iap.middleware.auth",
                reason = e.reason(),
                error = %e,
                method = %req.method(),
                path = %req.uri().path(),
                "Rejected request"
            );
            Err(ProxyError::Unauthorized(e))
        }
    }
}

/// Extension trait for reading the verified assertion from a request.
pub trait AssertionExt {
    /// Returns `None` if the gate did not verify this request.
    fn assertion(&self) -> Option<&VerifiedAssertion>;
}

impl<B> AssertionExt for axum::extract::Request<B> {
    fn assertion(&self) -> Option<&VerifiedAssertion> {
        self.extensions().get::<VerifiedAssertion>()
    }
}
