//! Builder patterns for test assertions
//!
//! Provides a fluent API for creating IAP assertions, valid by default and
//! broken one field at a time.

use crate::crypto_fixtures::TestSigningKey;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Audience used by test servers and default assertions.
pub const TEST_AUDIENCE: &str = "/projects/123456789/global/backendServices/987654321";

/// Issuer of IAP assertions.
pub const IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// Key id placed in unsigned assertions when none is set.
pub const DEFAULT_UNSIGNED_KID: &str = "test-kid";

#[derive(Debug, Clone)]
enum KidChoice {
    /// Use the signing key's kid.
    FromKey,
    Explicit(String),
    Omitted,
}

/// Builder for creating test IAP assertions
///
/// # Example
/// ```rust,ignore
/// let key = TestSigningKey::generate("kid-1");
/// let token = TestTokenBuilder::new()
///     .for_user("alice@example.com")
///     .expires_in(600)
///     .sign(&key);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
    kid: KidChoice,
}

impl TestTokenBuilder {
    /// Create a new builder with valid defaults: IAP issuer, `TEST_AUDIENCE`,
    /// issued now, expiring in ten minutes.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(IAP_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(600)).timestamp()),
        );
        claims.insert("sub".to_string(), json!("accounts.google.com:1000"));
        claims.insert("email".to_string(), json!("test-user@example.com"));

        Self {
            claims,
            kid: KidChoice::FromKey,
        }
    }

    /// Set the user email
    pub fn for_user(self, email: &str) -> Self {
        self.with_claim("email", json!(email))
    }

    pub fn with_audience(self, aud: &str) -> Self {
        self.with_claim("aud", json!(aud))
    }

    pub fn with_issuer(self, iss: &str) -> Self {
        self.with_claim("iss", json!(iss))
    }

    /// Set expiration in seconds from now
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set expiration timestamp
    pub fn expires_at(self, timestamp: i64) -> Self {
        self.with_claim("exp", json!(timestamp))
    }

    /// Set issued-at timestamp
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    /// Set or replace any claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Override the header kid (an empty string is kept as-is)
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = KidChoice::Explicit(kid.to_string());
        self
    }

    /// Leave `kid` out of the header
    pub fn without_kid(mut self) -> Self {
        self.kid = KidChoice::Omitted;
        self
    }

    /// The claims as a JSON value
    pub fn claims(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// The claims segment as it appears in a compact token
    pub fn encoded_claims(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.claims().to_string())
    }

    fn header_kid(&self, key_kid: Option<&str>) -> Option<String> {
        match &self.kid {
            KidChoice::FromKey => key_kid.map(ToString::to_string),
            KidChoice::Explicit(kid) => Some(kid.clone()),
            KidChoice::Omitted => None,
        }
    }

    /// Sign with ES256
    pub fn sign(&self, key: &TestSigningKey) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = self.header_kid(Some(&key.kid));

        jsonwebtoken::encode(&header, &self.claims(), &key.encoding_key())
            .expect("ES256 signing should succeed")
    }

    /// Sign with HS256 using `secret` as the HMAC key
    pub fn sign_hs256(&self, secret: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.header_kid(Some(DEFAULT_UNSIGNED_KID));

        jsonwebtoken::encode(&header, &self.claims(), &EncodingKey::from_secret(secret))
            .expect("HS256 signing should succeed")
    }

    /// Build a token with an arbitrary `alg` and a meaningless signature
    pub fn build_unsigned(&self, alg: &str) -> String {
        let mut header = Map::new();
        header.insert("alg".to_string(), json!(alg));
        header.insert("typ".to_string(), json!("JWT"));
        if let Some(kid) = self.header_kid(Some(DEFAULT_UNSIGNED_KID)) {
            header.insert("kid".to_string(), json!(kid));
        }

        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(Value::Object(header).to_string()),
            self.encoded_claims(),
            URL_SAFE_NO_PAD.encode(b"not-a-signature"),
        )
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
