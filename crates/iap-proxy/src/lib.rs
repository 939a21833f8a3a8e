//! IAP Proxy Library
//!
//! A reverse proxy that admits only requests carrying a valid Identity-Aware
//! Proxy assertion in `x-goog-iap-jwt-assertion`:
//!
//! - Fetches and caches the issuer's ES256 public keys
//! - Verifies signature, algorithm, expiry, audience and issuer
//! - Forwards accepted requests to the upstream unchanged
//! - Rejects everything else with an opaque 401
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/verifier.rs -> auth/keys.rs
//!                                     -> handlers/proxy.rs -> upstream
//! ```
//!
//! # Modules
//!
//! - `auth` - Key provider and assertion verifier
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - Health, metrics and proxy handlers
//! - `middleware` - Assertion gate and HTTP metrics
//! - `models` - Response models
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
