//! ES256 signing keys for testing
//!
//! Provides fresh P-256 keypairs whose public halves are rendered as PEM,
//! matching what the IAP public key endpoint serves.

use base64::engine::general_purpose;
use base64::Engine;
use jsonwebtoken::EncodingKey;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// DER prefix of a P-256 SubjectPublicKeyInfo, up to the BIT STRING contents.
///
/// ```text
/// SEQUENCE {
///   SEQUENCE { OID ecPublicKey, OID prime256v1 }
///   BIT STRING (0 unused bits) <65-byte uncompressed point>
/// }
/// ```
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// A P-256 keypair with the key id it is published under.
#[derive(Clone)]
pub struct TestSigningKey {
    /// Key id placed in the assertion header and the key map.
    pub kid: String,
    pkcs8: Vec<u8>,
    public_point: Vec<u8>,
}

impl std::fmt::Debug for TestSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl TestSigningKey {
    /// Generate a new random keypair.
    pub fn try_generate(kid: &str) -> Result<Self, FixtureError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate P-256 key: {e:?}")))?;

        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| FixtureError::Crypto(format!("Failed to load P-256 key: {e:?}")))?;

        Ok(Self {
            kid: kid.to_string(),
            pkcs8: pkcs8.as_ref().to_vec(),
            public_point: key_pair.public_key().as_ref().to_vec(),
        })
    }

    /// Generate a new random keypair, panicking on failure.
    pub fn generate(kid: &str) -> Self {
        Self::try_generate(kid).expect("P-256 key generation should succeed")
    }

    /// Public key as SPKI PEM, the format the key endpoint serves.
    pub fn public_key_pem(&self) -> String {
        let mut der = P256_SPKI_PREFIX.to_vec();
        der.extend_from_slice(&self.public_point);

        let encoded = general_purpose::STANDARD.encode(der);
        let body = encoded
            .as_bytes()
            .chunks(64)
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        format!("-----BEGIN PUBLIC KEY-----\n{body}\n-----END PUBLIC KEY-----\n")
    }

    /// Private key for signing with `jsonwebtoken`.
    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ec_der(&self.pkcs8)
    }
}

/// Build the key endpoint body: a JSON object of kid to PEM.
pub fn public_key_map(keys: &[&TestSigningKey]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .map(|k| (k.kid.clone(), serde_json::Value::String(k.public_key_pem())))
        .collect();
    serde_json::Value::Object(map)
}
