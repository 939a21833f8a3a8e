//! # IAP Test Utilities
//!
//! Shared test utilities for the IAP proxy.
//!
//! This crate provides:
//! - P-256 signing keys published the way IAP publishes them (`crypto_fixtures`)
//! - Assertion builders with IAP defaults (`token_builders`)
//! - Server test harness (`TestIapServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use iap_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let key = TestSigningKey::generate("kid-1");
//!     let key_server = MockServer::start().await;
//!     // mount public_key_map(&[&key]) on key_server ...
//!
//!     let server = TestIapServer::spawn(&key_url, &upstream_url).await?;
//!     let token = TestTokenBuilder::new().sign(&key);
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/app", server.url()))
//!         .header("x-goog-iap-jwt-assertion", token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
