//! IAP proxy configuration.
//!
//! Configuration is loaded from environment variables. Invalid values fail
//! startup; nothing is silently clamped.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use reqwest::Url;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default upstream the proxy forwards to.
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:8001";

/// Google's published IAP signing keys (kid to PEM map).
pub const DEFAULT_IAP_PUBLIC_KEY_URL: &str = "https://www.gstatic.com/iap/verify/public_key";

/// Default key cache TTL in seconds (5 minutes).
pub const DEFAULT_KEY_CACHE_TTL_SECONDS: u64 = 300;

/// Upper bound for the key cache TTL (1 day).
pub const MAX_KEY_CACHE_TTL_SECONDS: u64 = 86_400;

/// Default key fetch timeout in seconds.
pub const DEFAULT_KEY_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Upper bound for the key fetch timeout.
pub const MAX_KEY_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Default drain period after a shutdown signal, in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 10;

/// Upper bound for the drain period (5 minutes).
pub const MAX_DRAIN_SECONDS: u64 = 300;

/// IAP proxy configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: SocketAddr,

    /// Base URL of the protected backend (default: "http://localhost:8001").
    pub upstream_url: Url,

    /// Audience every assertion must carry, exactly.
    pub iap_audience: String,

    /// URL of the IAP public key endpoint.
    pub iap_public_key_url: String,

    /// Leeway applied to `exp` and `iat`, in seconds (0-600).
    pub jwt_clock_skew_seconds: u64,

    /// How long a fetched key set is reused. 0 disables caching.
    pub key_cache_ttl_seconds: u64,

    /// Timeout for a single key fetch, in seconds (1-30).
    pub key_fetch_timeout_seconds: u64,

    /// Exact request paths proxied without an assertion.
    pub unauthenticated_paths: Vec<String>,

    /// Drain period after a shutdown signal, in seconds. 0 skips it.
    pub drain_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("upstream_url", &self.upstream_url.as_str())
            .field("iap_audience", &self.iap_audience)
            .field("iap_public_key_url", &self.iap_public_key_url)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("key_cache_ttl_seconds", &self.key_cache_ttl_seconds)
            .field("key_fetch_timeout_seconds", &self.key_fetch_timeout_seconds)
            .field("unauthenticated_paths", &self.unauthenticated_paths)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),

    #[error("Invalid public key URL: {0}")]
    InvalidPublicKeyUrl(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid key cache TTL configuration: {0}")]
    InvalidKeyCacheTtl(String),

    #[error("Invalid key fetch timeout configuration: {0}")]
    InvalidKeyFetchTimeout(String),

    #[error("Invalid unauthenticated path: {0}")]
    InvalidUnauthenticatedPath(String),

    #[error("Invalid drain period configuration: {0}")]
    InvalidDrainSeconds(String),
}

/// Parse an optional unsigned integer setting and check it against `min..=max`.
fn parse_bounded(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, String> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        format!("{name} must be a valid non-negative integer, got '{value_str}': {e}")
    })?;

    if value < min {
        return Err(format!("{name} must be at least {min}, got {value}"));
    }

    if value > max {
        return Err(format!("{name} must not exceed {max} seconds, got {value}"));
    }

    Ok(value)
}

/// Parse an http(s) URL with a host.
fn parse_http_url(name: &str, value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| format!("{name} '{value}' is not a URL: {e}"))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!(
            "{name} must use http or https, got '{}'",
            url.scheme()
        ));
    }

    if url.host_str().is_none() {
        return Err(format!("{name} '{value}' has no host"));
    }

    Ok(url)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let iap_audience = vars
            .get("IAP_AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("IAP_AUDIENCE".to_string()))?;

        let bind_address_str = vars
            .get("BIND_ADDRESS")
            .map(String::as_str)
            .unwrap_or(DEFAULT_BIND_ADDRESS);
        let bind_address: SocketAddr = bind_address_str.parse().map_err(|e| {
            ConfigError::InvalidBindAddress(format!(
                "BIND_ADDRESS must be host:port, got '{bind_address_str}': {e}"
            ))
        })?;

        let upstream_url = parse_http_url(
            "UPSTREAM_URL",
            vars.get("UPSTREAM_URL")
                .map(String::as_str)
                .unwrap_or(DEFAULT_UPSTREAM_URL),
        )
        .map_err(ConfigError::InvalidUpstreamUrl)?;

        let iap_public_key_url = vars
            .get("IAP_PUBLIC_KEY_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_IAP_PUBLIC_KEY_URL.to_string());
        parse_http_url("IAP_PUBLIC_KEY_URL", &iap_public_key_url)
            .map_err(ConfigError::InvalidPublicKeyUrl)?;

        // Zero leeway is allowed: exp and iat are then checked exactly.
        let jwt_clock_skew_seconds = parse_bounded(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
            0,
            MAX_CLOCK_SKEW.as_secs(),
        )
        .map_err(ConfigError::InvalidJwtClockSkew)?;

        let key_cache_ttl_seconds = parse_bounded(
            vars,
            "KEY_CACHE_TTL_SECONDS",
            DEFAULT_KEY_CACHE_TTL_SECONDS,
            0,
            MAX_KEY_CACHE_TTL_SECONDS,
        )
        .map_err(ConfigError::InvalidKeyCacheTtl)?;

        let key_fetch_timeout_seconds = parse_bounded(
            vars,
            "KEY_FETCH_TIMEOUT_SECONDS",
            DEFAULT_KEY_FETCH_TIMEOUT_SECONDS,
            1,
            MAX_KEY_FETCH_TIMEOUT_SECONDS,
        )
        .map_err(ConfigError::InvalidKeyFetchTimeout)?;

        let mut unauthenticated_paths: Vec<String> = Vec::new();
        if let Some(list) = vars.get("UNAUTHENTICATED_PATHS") {
            for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !entry.starts_with('/') {
                    return Err(ConfigError::InvalidUnauthenticatedPath(format!(
                        "UNAUTHENTICATED_PATHS entries must start with '/', got '{entry}'"
                    )));
                }
                if !unauthenticated_paths.iter().any(|p| p == entry) {
                    unauthenticated_paths.push(entry.to_string());
                }
            }
        }

        let drain_seconds = parse_bounded(
            vars,
            "IAP_PROXY_DRAIN_SECONDS",
            DEFAULT_DRAIN_SECONDS,
            0,
            MAX_DRAIN_SECONDS,
        )
        .map_err(ConfigError::InvalidDrainSeconds)?;

        Ok(Config {
            bind_address,
            upstream_url,
            iap_audience,
            iap_public_key_url,
            jwt_clock_skew_seconds,
            key_cache_ttl_seconds,
            key_fetch_timeout_seconds,
            unauthenticated_paths,
            drain_seconds,
        })
    }
}
