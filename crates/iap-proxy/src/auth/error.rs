//! Verification failure taxonomy.
//!
//! Every way an assertion can fail has its own variant so that logs and
//! metrics can tell them apart. At the HTTP boundary they all collapse into
//! the same opaque 401.

use common::jwt::JwtValidationError;
use thiserror::Error;

/// Reason an assertion was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// No assertion header, or an empty one.
    #[error("assertion header missing or empty")]
    MissingToken,

    /// Not a decodable compact JWS, or a required claim is absent.
    #[error("assertion is malformed")]
    MalformedToken,

    /// Header `alg` is anything other than ES256.
    #[error("assertion uses disallowed algorithm '{0}'")]
    Algorithm(String),

    /// Header carries no usable `kid`.
    #[error("assertion header has no key id")]
    MissingKeyId,

    /// Key endpoint unreachable, timed out, or returned a non-success status.
    #[error("key fetch failed: {0}")]
    Network(String),

    /// Key endpoint body was not a JSON object of string to string.
    #[error("key set could not be decoded: {0}")]
    Decode(String),

    /// No key with the assertion's `kid` in the current key set.
    #[error("no signing key with id '{0}'")]
    UnknownKey(String),

    /// The published key for this `kid` is not a valid EC public key.
    #[error("signing key '{0}' could not be parsed")]
    KeyParse(String),

    /// Signature does not verify against the resolved key.
    #[error("signature verification failed")]
    Signature,

    /// `exp` plus leeway is in the past.
    #[error("assertion has expired")]
    Expired,

    /// `iat` minus leeway is in the future.
    #[error("assertion is not yet valid")]
    NotYetValid,

    /// `aud` does not equal the configured audience.
    #[error("assertion audience does not match")]
    AudienceMismatch,

    /// `iss` is not the IAP issuer.
    #[error("assertion issuer does not match")]
    IssuerMismatch,
}

impl VerifyError {
    /// Stable short code for log fields and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::MissingToken => "missing_token",
            VerifyError::MalformedToken => "malformed_token",
            VerifyError::Algorithm(_) => "algorithm",
            VerifyError::MissingKeyId => "missing_key_id",
            VerifyError::Network(_) => "network",
            VerifyError::Decode(_) => "decode",
            VerifyError::UnknownKey(_) => "unknown_key",
            VerifyError::KeyParse(_) => "key_parse",
            VerifyError::Signature => "signature",
            VerifyError::Expired => "expired",
            VerifyError::NotYetValid => "not_yet_valid",
            VerifyError::AudienceMismatch => "audience_mismatch",
            VerifyError::IssuerMismatch => "issuer_mismatch",
        }
    }
}

impl From<JwtValidationError> for VerifyError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                VerifyError::MalformedToken
            }
            JwtValidationError::Expired => VerifyError::Expired,
            JwtValidationError::IatTooFarInFuture => VerifyError::NotYetValid,
        }
    }
}
