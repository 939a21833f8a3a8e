//! IAP assertion claims.
//!
//! `sub` and `email` identify the end user and are redacted in Debug output
//! so that claims can be logged safely.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims carried by an IAP assertion.
///
/// `iss`, `aud`, `iat` and `exp` are required; a payload without them is
/// malformed. `aud` must be a single string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IapClaims {
    /// Issuer. Must be `https://cloud.google.com/iap`.
    pub iss: String,

    /// Audience. Must equal the configured audience exactly.
    pub aud: String,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Stable Google account identifier - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Authenticated user's email - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Hosted domain of the user, when the account belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd: Option<String>,
}

impl fmt::Debug for IapClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IapClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("hd", &self.hd)
            .finish()
    }
}

/// An assertion that passed every check.
///
/// Inserted into request extensions by the gate; never serialized onto
/// the forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    /// Key that signed the assertion.
    pub key_id: String,

    /// Algorithm the assertion was verified with (always ES256).
    pub algorithm: String,

    /// Verified claims.
    pub claims: IapClaims,
}
