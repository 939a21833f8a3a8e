//! JWT utilities shared across the IAP proxy workspace.
//!
//! This module provides the pieces of token handling that do not depend on a
//! key source:
//! - Size limits for DoS prevention
//! - Clock skew constants for `exp`/`iat` validation
//! - Unverified header and claims decoding (used to pick a key and to pin
//!   the algorithm before any cryptographic work)
//! - `exp` and `iat` validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing decoded here is trusted until the signature has been verified
//!   by the caller
//! - Error messages are generic; detail is logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_header_unverified, validate_exp_at, validate_iat_at, DEFAULT_CLOCK_SKEW};
//!
//! // Inspect the header before touching any key material
//! let header = decode_header_unverified(token)?;
//! if header.alg != "ES256" {
//!     return Err("wrong algorithm");
//! }
//!
//! // After signature verification, check the time window
//! let now = chrono::Utc::now().timestamp();
//! validate_exp_at(claims.exp, DEFAULT_CLOCK_SKEW, now)?;
//! validate_iat_at(claims.iat, DEFAULT_CLOCK_SKEW, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this are rejected BEFORE any base64 decoding or
/// cryptographic operations.
///
/// # Rationale
///
/// - An IAP assertion is roughly 600-900 bytes (ES256 signature, email claims)
/// - 8KB leaves ample headroom while bounding per-request work
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes).
///
/// Applied symmetrically: a token stays valid up to this long after `exp`,
/// and is accepted up to this long before `iat`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this value is rejected at startup.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT parsing and time-window validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("token is malformed")]
    MalformedToken,

    /// Token `exp` claim is further in the past than the clock skew allows.
    #[error("token has expired")]
    Expired,

    /// Token `iat` claim is too far in the future.
    #[error("token issued in the future")]
    IatTooFarInFuture,
}

// =============================================================================
// Header Types
// =============================================================================

/// JOSE header fields read before the signature is verified.
///
/// `alg` is required; a header without it is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnverifiedHeader {
    /// Signing algorithm claimed by the token.
    pub alg: String,

    /// Key ID used to select the verification key.
    #[serde(default)]
    pub kid: Option<String>,

    /// Token type, usually "JWT".
    #[serde(default)]
    pub typ: Option<String>,
}

impl UnverifiedHeader {
    /// Returns the `kid` if present and non-empty.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWS into its three segments after the size check.
fn split_token(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => Ok((header, claims, signature)),
        _ => {
            tracing::debug!(
                target: "common.jwt",
                parts = token.split('.').count(),
                "Token rejected: invalid JWT format"
            );
            Err(JwtValidationError::MalformedToken)
        }
    }
}

/// Decode one base64url JSON segment into `T`.
fn decode_segment<T: DeserializeOwned>(
    segment: &str,
    name: &'static str,
) -> Result<T, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to decode JWT base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to parse JWT JSON");
        JwtValidationError::MalformedToken
    })
}

/// Decode the JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - The returned header is untrusted; use it only to reject early (wrong
///   algorithm) or to look up a key in a trusted key set
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not three segments, bad base64url, invalid JSON, or
///   no `alg` field
pub fn decode_header_unverified(token: &str) -> Result<UnverifiedHeader, JwtValidationError> {
    let (header, _, _) = split_token(token)?;
    decode_segment(header, "header")
}

/// Decode the JWT claims without verifying the signature.
///
/// The claims type decides which fields are required; a missing required
/// field is reported as `MalformedToken`.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not three segments, bad base64url, or the payload
///   does not deserialize into `C`
pub fn decode_claims_unverified<C: DeserializeOwned>(token: &str) -> Result<C, JwtValidationError> {
    let (_, claims, _) = split_token(token)?;
    decode_segment(claims, "claims")
}

/// Convert a clock skew into whole seconds.
fn skew_secs(clock_skew: Duration) -> i64 {
    i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX)
}

/// Validate the `exp` (expiry) claim against `now` with clock skew tolerance.
///
/// The caller supplies `now` so that one request checks every claim against
/// the same instant.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` if `now > exp + clock_skew`.
pub fn validate_exp_at(exp: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let clock_skew_secs = skew_secs(clock_skew);
    let latest_valid = exp.saturating_add(clock_skew_secs);

    if now > latest_valid {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim against `now` with clock skew tolerance.
///
/// Rejects tokens with `iat` too far in the future, which could indicate
/// pre-generated tokens or badly skewed issuer clocks.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `now < iat - clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let clock_skew_secs = skew_secs(clock_skew);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
