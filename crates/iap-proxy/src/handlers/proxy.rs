//! Reverse proxy handler.
//!
//! Forwards a request that passed the gate to the upstream and streams the
//! response back. The request is forwarded as received apart from
//! hop-by-hop headers and the `X-Forwarded-*` set; the assertion header
//! goes through untouched so the upstream may re-verify it.

use crate::errors::ProxyError;
use crate::observability::metrics::record_upstream_request;
use crate::routes::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{CONNECTION, CONTENT_LENGTH, HOST},
        HeaderMap, HeaderName, HeaderValue,
    },
    response::Response,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use reqwest::Url;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::instrument;

/// Largest request body buffered for forwarding.
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forward the request to the upstream.
///
/// # Errors
///
/// - `PayloadTooLarge` if the body exceeds `MAX_REQUEST_BODY_BYTES`
/// - `BadGateway` if the upstream cannot be reached
#[instrument(skip_all, name = "iap.proxy.forward")]
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let url = build_upstream_url(&state.upstream_url, parts.uri.path(), parts.uri.query());
    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let headers = forwarded_headers(&parts.headers, client_ip);

    let body: Bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| {
            if is_length_limit(&e) {
                ProxyError::PayloadTooLarge
            } else {
                ProxyError::BadGateway(format!("failed to read request body: {e}"))
            }
        })?;

    tracing::debug!(target: "iap.proxy", method = %parts.method, path = %parts.uri.path(), "Forwarding request");

    let mut upstream_req = state
        .http_client
        .request(parts.method, url)
        .headers(headers);
    if !body.is_empty() {
        upstream_req = upstream_req.body(body);
    }

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            record_upstream_request(None);
            return Err(ProxyError::BadGateway(e.to_string()));
        }
    };

    let status = upstream_resp.status();
    record_upstream_request(Some(status.as_u16()));

    let mut response_headers = upstream_resp.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream_resp.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;

    Ok(response)
}

/// Join a request path and query onto the upstream base URL.
///
/// The base path is kept as a prefix with exactly one `/` at the join. A
/// base query and the request query are both kept, base first.
pub(crate) fn build_upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();

    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);

    let base_query = base.query().filter(|q| !q.is_empty());
    let request_query = query.filter(|q| !q.is_empty());
    let query = match (base_query, request_query) {
        (Some(b), Some(r)) => Some(format!("{b}&{r}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    };
    url.set_query(query.as_deref());

    url
}

/// Build the header set sent upstream.
fn forwarded_headers(original: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);

    // reqwest sets both from the outgoing request
    let host = headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    if let Some(ip) = client_ip {
        let prior: Vec<&str> = original
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {ip}", prior.join(", "))
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    headers
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}
