//! HTTP metrics middleware.
//!
//! Records every response, including gate rejections and errors produced
//! before a handler runs:
//! - 401 Unauthorized (assertion rejected)
//! - 408 Request Timeout
//! - 413 Payload Too Large
//! - 502 Bad Gateway (upstream unreachable)

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records HTTP request metrics for all responses.
///
/// Applied as the outermost layer. The path is captured before the request
/// moves into the inner service and is normalized at record time.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
