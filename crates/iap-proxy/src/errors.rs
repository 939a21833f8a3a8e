//! IAP proxy error types.
//!
//! Every error maps to a status code and a body that is the status text
//! only. Details stay in server-side logs.

use crate::auth::VerifyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// HTTP-layer error.
///
/// Maps to:
/// - Unauthorized: 401 Unauthorized
/// - BadGateway: 502 Bad Gateway
/// - PayloadTooLarge: 413 Payload Too Large
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] VerifyError),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            // Reason is logged by the gate; the client learns nothing
            ProxyError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ProxyError::BadGateway(err) => {
                tracing::warn!(target: "iap.proxy", error = %err, "Upstream request failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
            ProxyError::PayloadTooLarge => {
                tracing::debug!(target: "iap.proxy", "Request body exceeded limit");
                (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
            }
            ProxyError::Internal(err) => {
                tracing::error!(target: "iap.proxy", error = %err, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_display_unauthorized() {
        let error = ProxyError::Unauthorized(VerifyError::Expired);
        assert_eq!(format!("{error}"), "Unauthorized: assertion has expired");
    }

    #[test]
    fn test_display_bad_gateway() {
        let error = ProxyError::BadGateway("connection refused".to_string());
        assert_eq!(format!("{error}"), "Bad gateway: connection refused");
    }

    #[test]
    fn test_from_verify_error() {
        let error: ProxyError = VerifyError::Signature.into();
        assert!(matches!(
            error,
            ProxyError::Unauthorized(VerifyError::Signature)
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProxyError::Unauthorized(VerifyError::MissingToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::BadGateway(String::new()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::Internal(String::new()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_unauthorized_body_is_opaque() {
        for reason in [
            VerifyError::Expired,
            VerifyError::AudienceMismatch,
            VerifyError::UnknownKey("kid-secret".to_string()),
        ] {
            let response = ProxyError::Unauthorized(reason).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(read_body(response.into_body()).await, "Unauthorized");
        }
    }

    #[tokio::test]
    async fn test_bad_gateway_hides_detail() {
        let response =
            ProxyError::BadGateway("10.0.0.7:8001 connection refused".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(read_body(response.into_body()).await, "Bad Gateway");
    }

    #[tokio::test]
    async fn test_payload_too_large_response() {
        let response = ProxyError::PayloadTooLarge.into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(read_body(response.into_body()).await, "Payload Too Large");
    }

    #[tokio::test]
    async fn test_internal_response() {
        let response = ProxyError::Internal("header build failed".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            read_body(response.into_body()).await,
            "Internal Server Error"
        );
    }
}
