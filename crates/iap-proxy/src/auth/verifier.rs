//! IAP assertion verification.
//!
//! Turns a raw `x-goog-iap-jwt-assertion` value into either verified claims
//! or a specific rejection reason.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The algorithm is pinned to ES256 from the raw header, before any key
//!   lookup; `none`, HMAC and RSA tokens never reach signature verification
//! - Expiry and issued-at are checked with a symmetric leeway
//! - Audience and issuer are exact string matches

use crate::auth::claims::{IapClaims, VerifiedAssertion};
use crate::auth::error::VerifyError;
use crate::auth::keys::KeyProvider;
use crate::observability::metrics::record_token_verification;
use common::jwt::{
    decode_claims_unverified, decode_header_unverified, validate_exp_at, validate_iat_at,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Issuer of every IAP assertion.
pub const IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// The only signing algorithm IAP uses.
pub const ALLOWED_ALGORITHM: &str = "ES256";

/// Verifies IAP assertions against a fixed audience.
pub struct TokenVerifier {
    /// Source of signing keys.
    keys: Arc<dyn KeyProvider>,

    /// Audience every assertion must carry.
    expected_audience: String,

    /// Leeway applied to `exp` and `iat`.
    clock_skew: Duration,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("expected_audience", &self.expected_audience)
            .field("expected_issuer", &IAP_ISSUER)
            .field("allowed_algorithm", &ALLOWED_ALGORITHM)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `keys` - Provider of the issuer's current signing keys
    /// * `expected_audience` - Exact `aud` value to accept
    /// * `clock_skew` - Leeway for `exp` and `iat`
    pub fn new(keys: Arc<dyn KeyProvider>, expected_audience: String, clock_skew: Duration) -> Self {
        Self {
            keys,
            expected_audience,
            clock_skew,
        }
    }

    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Whether the underlying key provider has a usable key set cached.
    pub async fn keys_warm(&self) -> bool {
        self.keys.is_warm().await
    }

    /// Verify an assertion against the current time.
    ///
    /// # Checks (in order)
    ///
    /// 1. Non-empty, at most 8KB, three decodable segments with the required claims
    /// 2. Header `alg` is exactly ES256
    /// 3. Header carries a non-empty `kid`
    /// 4. Key for `kid` resolves from the key provider
    /// 5. Signature verifies
    /// 6. Not expired, not issued in the future (both with leeway)
    /// 7. Audience, then issuer, match exactly
    ///
    /// # Errors
    ///
    /// Returns the `VerifyError` of the first failed check.
    #[instrument(skip_all, name = "iap.auth.verify")]
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedAssertion, VerifyError> {
        let now = chrono::Utc::now().timestamp();
        let result = self.verify_at(raw_token, now).await;

        match &result {
            Ok(assertion) => {
                tracing::debug!(target: "iap.auth.verifier", kid = %assertion.key_id, "Assertion verified");
                record_token_verification("accepted", "none");
            }
            Err(e) => {
                tracing::debug!(target: "iap.auth.verifier", reason = e.reason(), error = %e, "Assertion rejected");
                record_token_verification("rejected", e.reason());
            }
        }

        result
    }

    /// Deterministic verification against an explicit `now` timestamp.
    pub(crate) async fn verify_at(
        &self,
        raw_token: &str,
        now: i64,
    ) -> Result<VerifiedAssertion, VerifyError> {
        let token = raw_token.trim();
        if token.is_empty() {
            return Err(VerifyError::MissingToken);
        }

        // Parse without trusting anything yet (includes the size check)
        let header = decode_header_unverified(token)?;
        decode_claims_unverified::<IapClaims>(token)?;

        if header.alg != ALLOWED_ALGORITHM {
            return Err(VerifyError::Algorithm(header.alg));
        }

        let kid = header.key_id().ok_or(VerifyError::MissingKeyId)?.to_string();

        let key = self.keys.get_key(&kid).await?;
        let claims = verify_signature(token, &key, &kid)?;

        validate_exp_at(claims.exp, self.clock_skew, now)?;
        validate_iat_at(claims.iat, self.clock_skew, now)?;

        if claims.aud != self.expected_audience {
            tracing::debug!(target: "iap.auth.verifier", aud = %claims.aud, "Audience mismatch");
            return Err(VerifyError::AudienceMismatch);
        }

        if claims.iss != IAP_ISSUER {
            tracing::debug!(target: "iap.auth.verifier", iss = %claims.iss, "Issuer mismatch");
            return Err(VerifyError::IssuerMismatch);
        }

        Ok(VerifiedAssertion {
            key_id: kid,
            algorithm: ALLOWED_ALGORITHM.to_string(),
            claims,
        })
    }
}

/// Verify the ES256 signature and return the claims.
///
/// Time, audience and issuer checks are left to the caller so that each
/// failure keeps its own reason.
fn verify_signature(token: &str, key: &DecodingKey, kid: &str) -> Result<IapClaims, VerifyError> {
    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<IapClaims>(token, key, &validation).map_err(|e| {
        tracing::debug!(target: "iap.auth.verifier", error = %e, "Signature verification failed");
        match e.kind() {
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                VerifyError::KeyParse(kid.to_string())
            }
            ErrorKind::InvalidAlgorithm => VerifyError::Algorithm(ALLOWED_ALGORITHM.to_string()),
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => VerifyError::MalformedToken,
            _ => VerifyError::Signature,
        }
    })?;

    Ok(token_data.claims)
}
