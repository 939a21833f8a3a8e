//! IAP assertion verification.
//!
//! # Components
//!
//! - `keys` - Signing key retrieval and caching (`KeyProvider`)
//! - `verifier` - Assertion verification (`TokenVerifier`)
//! - `claims` - Assertion claims and the verified result
//! - `error` - Rejection reasons

pub mod claims;
pub mod error;
pub mod keys;
pub mod verifier;

pub use claims::{IapClaims, VerifiedAssertion};
pub use error::VerifyError;
pub use keys::{HttpKeyProvider, KeyProvider, KeySet, SigningKey, StaticKeyProvider};
pub use verifier::{TokenVerifier, ALLOWED_ALGORITHM, IAP_ISSUER};
