//! HTTP request handlers for the IAP proxy.

pub mod health;
pub mod metrics;
pub mod proxy;

pub use health::{liveness_check, readiness_check};
pub use metrics::metrics_handler;
pub use proxy::proxy;
