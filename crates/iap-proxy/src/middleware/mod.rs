//! Middleware for the IAP proxy.
//!
//! # Components
//!
//! - `auth` - IAP assertion gate in front of the proxy
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{require_iap_assertion, AuthState, IAP_ASSERTION_HEADER};
pub use http_metrics::http_metrics_middleware;
