//! IAP signing key provider.
//!
//! Google publishes the current IAP signing keys as a JSON object mapping
//! key id to a PEM-encoded P-256 public key. The provider fetches that map,
//! caches it for a configurable TTL and resolves a key id to a verification
//! key.
//!
//! # Cache
//!
//! - The cached key set is immutable and published as a single `Arc` swap;
//!   readers never observe a partially refreshed set
//! - A refresh happens when the set is missing, expired, or lacks the
//!   requested key id
//! - Concurrent refreshes are collapsed: callers that queued behind an
//!   in-flight refresh reuse its result, including its error
//! - A failed fetch leaves the previous entry untouched and never extends
//!   its expiry
//! - A TTL of zero disables caching and fetches on every lookup

use crate::auth::error::VerifyError;
use crate::observability::metrics::record_key_fetch;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Default key fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Minimum age of a cached set before an unknown key id may trigger a refetch.
///
/// Keeps a stream of tokens with bogus key ids from turning into a stream
/// of requests to the key endpoint.
pub const DEFAULT_MISS_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One published signing key. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    /// Key id referenced by the assertion header.
    pub key_id: String,

    /// PEM-encoded EC public key.
    pub public_key_pem: String,
}

/// Complete set of signing keys from one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    /// Build a key set from the endpoint's kid to PEM map.
    pub fn from_pem_map(pems: HashMap<String, String>) -> Self {
        let keys = pems
            .into_iter()
            .map(|(key_id, public_key_pem)| {
                let key = SigningKey {
                    key_id: key_id.clone(),
                    public_key_pem,
                };
                (key_id, key)
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    /// Resolve `kid` to a verification key.
    ///
    /// # Errors
    ///
    /// - `UnknownKey` if `kid` is not in the set
    /// - `KeyParse` if the published PEM is not a valid EC public key
    pub fn resolve_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        let key = self
            .keys
            .get(kid)
            .ok_or_else(|| VerifyError::UnknownKey(kid.to_string()))?;

        DecodingKey::from_ec_pem(key.public_key_pem.as_bytes()).map_err(|e| {
            tracing::warn!(target: "iap.auth.keys", kid = %kid, error = %e, "Published key is not a valid EC public key");
            VerifyError::KeyParse(kid.to_string())
        })
    }
}

/// Source of verification keys.
///
/// The HTTP implementation is [`HttpKeyProvider`]; [`StaticKeyProvider`]
/// serves a fixed set.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    /// Resolve the verification key for `kid`, fetching keys as needed.
    async fn get_key(&self, kid: &str) -> Result<DecodingKey, VerifyError>;

    /// Whether a non-expired key set is available without a fetch.
    async fn is_warm(&self) -> bool;
}

/// Cached key set with fetch and expiry times.
struct CachedKeys {
    keys: Arc<KeySet>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CachedKeys {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Most recent refresh that failed.
struct FailedRefresh {
    failed_at: Instant,
    error: VerifyError,
}

/// Key provider backed by the IAP public key endpoint.
pub struct HttpKeyProvider {
    /// URL of the key endpoint.
    key_url: String,

    /// HTTP client with the fetch timeout applied.
    http_client: reqwest::Client,

    /// Current key set, replaced whole on refresh.
    cache: RwLock<Option<Arc<CachedKeys>>>,

    /// Serialises refreshes. Holds the last failure so that callers queued
    /// behind a failing fetch return its error instead of fetching again.
    refresh_lock: Mutex<Option<FailedRefresh>>,

    /// Cache TTL duration. Zero disables caching.
    cache_ttl: Duration,

    /// See [`DEFAULT_MISS_REFRESH_INTERVAL`].
    miss_refresh_interval: Duration,
}

impl fmt::Debug for HttpKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpKeyProvider")
            .field("key_url", &self.key_url)
            .field("cache_ttl", &self.cache_ttl)
            .field("miss_refresh_interval", &self.miss_refresh_interval)
            .finish_non_exhaustive()
    }
}

impl HttpKeyProvider {
    /// Create a provider with the default TTL and fetch timeout.
    pub fn new(key_url: String) -> Self {
        Self::with_settings(
            key_url,
            Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
        )
    }

    /// Create a provider with a custom cache TTL and fetch timeout.
    ///
    /// # Arguments
    ///
    /// * `key_url` - URL of the kid to PEM key endpoint
    /// * `cache_ttl` - How long a fetched set is reused (zero disables caching)
    /// * `fetch_timeout` - Upper bound on a single fetch
    pub fn with_settings(key_url: String, cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "iap.auth.keys", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            key_url,
            http_client,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            cache_ttl,
            miss_refresh_interval: DEFAULT_MISS_REFRESH_INTERVAL,
        }
    }

    /// Override the minimum cache age before a key id miss triggers a refetch.
    pub fn with_miss_refresh_interval(mut self, interval: Duration) -> Self {
        self.miss_refresh_interval = interval;
        self
    }

    pub fn key_url(&self) -> &str {
        &self.key_url
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Fetch the current key set from the endpoint. Does not touch the cache.
    ///
    /// # Errors
    ///
    /// - `Network` if the request fails, times out, or returns a non-success status
    /// - `Decode` if the body is not a JSON object of string to string
    #[instrument(skip(self), fields(url = %self.key_url))]
    pub async fn fetch_keys(&self) -> Result<KeySet, VerifyError> {
        let start = Instant::now();
        let result = self.fetch_keys_inner().await;

        let status = match &result {
            Ok(_) => "success",
            Err(VerifyError::Decode(_)) => "decode_error",
            Err(_) => "network_error",
        };
        record_key_fetch(status, start.elapsed());

        result
    }

    async fn fetch_keys_inner(&self) -> Result<KeySet, VerifyError> {
        tracing::debug!(target: "iap.auth.keys", url = %self.key_url, "Fetching IAP public keys");

        let response = self
            .http_client
            .get(&self.key_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "iap.auth.keys", error = %e, timeout = e.is_timeout(), "Failed to fetch IAP public keys");
                if e.is_timeout() {
                    VerifyError::Network("key endpoint timed out".to_string())
                } else {
                    VerifyError::Network("key endpoint unreachable".to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "iap.auth.keys",
                status = %status,
                "Key endpoint returned error"
            );
            return Err(VerifyError::Network(format!(
                "key endpoint returned {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::error!(target: "iap.auth.keys", error = %e, "Failed to read key endpoint body");
            if e.is_timeout() {
                VerifyError::Network("key endpoint timed out".to_string())
            } else {
                VerifyError::Network("key endpoint body interrupted".to_string())
            }
        })?;

        let pems: HashMap<String, String> = serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(target: "iap.auth.keys", error = %e, "Key endpoint body is not a kid to PEM map");
            VerifyError::Decode(e.to_string())
        })?;

        let keys = KeySet::from_pem_map(pems);
        tracing::info!(
            target: "iap.auth.keys",
            key_count = keys.len(),
            "IAP public keys fetched"
        );

        Ok(keys)
    }

    /// Fetch eagerly so the first request does not pay for it.
    ///
    /// Returns the number of keys fetched.
    pub async fn warm(&self) -> Result<usize, VerifyError> {
        if self.cache_ttl.is_zero() {
            return self.fetch_keys().await.map(|keys| keys.len());
        }
        self.refresh(None).await.map(|keys| keys.len())
    }

    /// Whether a non-expired key set is cached.
    pub async fn is_warm(&self) -> bool {
        self.cache
            .read()
            .await
            .as_ref()
            .is_some_and(|cached| cached.is_fresh(Instant::now()))
    }

    /// Resolve the verification key for `kid`.
    ///
    /// # Errors
    ///
    /// - `Network` / `Decode` if a needed fetch fails
    /// - `UnknownKey` if `kid` is absent even from a fresh set
    /// - `KeyParse` if the published PEM for `kid` is invalid
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        if self.cache_ttl.is_zero() {
            return self.fetch_keys().await?.resolve_key(kid);
        }

        let cached = self.cache.read().await.clone();
        let now = Instant::now();

        let seen = match cached {
            Some(cached) if cached.is_fresh(now) => {
                if cached.keys.contains(kid) {
                    tracing::debug!(target: "iap.auth.keys", kid = %kid, "Key cache hit");
                    return cached.keys.resolve_key(kid);
                }

                if now.duration_since(cached.fetched_at) < self.miss_refresh_interval {
                    tracing::debug!(target: "iap.auth.keys", kid = %kid, "Key id not in recently fetched set");
                    return Err(VerifyError::UnknownKey(kid.to_string()));
                }

                tracing::debug!(target: "iap.auth.keys", kid = %kid, "Key id not cached, refreshing");
                Some(cached.fetched_at)
            }
            Some(cached) => {
                tracing::debug!(target: "iap.auth.keys", "Key cache expired, refreshing");
                Some(cached.fetched_at)
            }
            None => None,
        };

        let keys = self.refresh(seen).await?;
        if !keys.contains(kid) {
            tracing::warn!(target: "iap.auth.keys", kid = %kid, "Key id not found after refresh");
        }
        keys.resolve_key(kid)
    }

    /// Refresh the cache unless another caller already replaced the entry
    /// identified by `seen` (its `fetched_at`) while this one waited.
    ///
    /// A fetch that fails after this caller queued is not repeated; its
    /// error is returned as is.
    async fn refresh(&self, seen: Option<Instant>) -> Result<Arc<KeySet>, VerifyError> {
        let queued_at = Instant::now();
        let mut last_failure = self.refresh_lock.lock().await;

        if let Some(failed) = last_failure.as_ref() {
            if failed.failed_at >= queued_at {
                tracing::debug!(target: "iap.auth.keys", error = %failed.error, "Reusing failure from concurrent refresh");
                return Err(failed.error.clone());
            }
        }

        if let Some(cached) = self.cache.read().await.as_ref() {
            if Some(cached.fetched_at) != seen && cached.is_fresh(Instant::now()) {
                tracing::debug!(target: "iap.auth.keys", "Reusing key set from concurrent refresh");
                return Ok(Arc::clone(&cached.keys));
            }
        }

        let keys = match self.fetch_keys().await {
            Ok(keys) => Arc::new(keys),
            Err(e) => {
                *last_failure = Some(FailedRefresh {
                    failed_at: Instant::now(),
                    error: e.clone(),
                });
                return Err(e);
            }
        };
        *last_failure = None;

        let fetched_at = Instant::now();
        let entry = CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at,
            expires_at: fetched_at + self.cache_ttl,
        };

        *self.cache.write().await = Some(Arc::new(entry));

        Ok(keys)
    }

    /// Clear the cache.
    #[cfg(test)]
    pub(crate) async fn clear_cache(&self) {
        *self.cache.write().await = None;
    }
}

#[async_trait::async_trait]
impl KeyProvider for HttpKeyProvider {
    async fn get_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        HttpKeyProvider::get_key(self, kid).await
    }

    async fn is_warm(&self) -> bool {
        HttpKeyProvider::is_warm(self).await
    }
}

/// Key provider over a fixed key set. Never fetches.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyProvider {
    keys: KeySet,
}

impl StaticKeyProvider {
    pub fn new(keys: KeySet) -> Self {
        Self { keys }
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        self.keys.resolve_key(kid)
    }

    async fn is_warm(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use iap_test_utils::crypto_fixtures::TestSigningKey;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pem_map(keys: &[&TestSigningKey]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| (k.kid.clone(), serde_json::Value::String(k.public_key_pem())))
            .collect();
        serde_json::Value::Object(map)
    }

    async fn mount_keys(server: &MockServer, body: serde_json::Value, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn provider(server: &MockServer, ttl_secs: u64) -> HttpKeyProvider {
        HttpKeyProvider::with_settings(
            format!("{}/public_key", server.uri()),
            Duration::from_secs(ttl_secs),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_key_set_from_pem_map() {
        let keys = KeySet::from_pem_map(HashMap::from([
            ("b".to_string(), "pem-b".to_string()),
            ("a".to_string(), "pem-a".to_string()),
        ]));

        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a"));
        assert_eq!(keys.get("b").unwrap().public_key_pem, "pem-b");
        assert_eq!(keys.get("b").unwrap().key_id, "b");
        assert!(!keys.contains("c"));
    }

    #[test]
    fn test_resolve_key_unknown() {
        let keys = KeySet::default();
        let result = keys.resolve_key("missing");
        assert_eq!(result.err(), Some(VerifyError::UnknownKey("missing".to_string())));
    }

    #[test]
    fn test_resolve_key_invalid_pem() {
        let keys = KeySet::from_pem_map(HashMap::from([(
            "bad".to_string(),
            "-----BEGIN PUBLIC KEY-----\nnot base64\n-----END PUBLIC KEY-----".to_string(),
        )]));
        let result = keys.resolve_key("bad");
        assert_eq!(result.err(), Some(VerifyError::KeyParse("bad".to_string())));
    }

    #[test]
    fn test_resolve_key_valid_pem() {
        let key = TestSigningKey::generate("kid-1");
        let keys = KeySet::from_pem_map(HashMap::from([(
            key.kid.clone(),
            key.public_key_pem(),
        )]));
        assert!(keys.resolve_key("kid-1").is_ok());
    }

    #[tokio::test]
    async fn test_fetch_keys_success() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 1).await;

        let keys = provider(&server, 300).fetch_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("kid-1"));
    }

    #[tokio::test]
    async fn test_fetch_keys_does_not_populate_cache() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 1).await;

        let provider = provider(&server, 300);
        provider.fetch_keys().await.unwrap();
        assert!(!provider.is_warm().await);
    }

    #[tokio::test]
    async fn test_fetch_keys_non_success_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = provider(&server, 300).fetch_keys().await;
        assert_eq!(
            result.err(),
            Some(VerifyError::Network("key endpoint returned 503".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_keys_non_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let result = provider(&server, 300).fetch_keys().await;
        assert!(matches!(result, Err(VerifyError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_keys_wrong_shape_is_decode_error() {
        let server = MockServer::start().await;
        mount_keys(
            &server,
            serde_json::json!({"keys": [{"kid": "a", "x": "b"}]}),
            1,
        )
        .await;

        let result = provider(&server, 300).fetch_keys().await;
        assert!(matches!(result, Err(VerifyError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_keys_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let provider = HttpKeyProvider::with_settings(
            format!("{}/public_key", server.uri()),
            Duration::from_secs(300),
            Duration::from_millis(200),
        );

        let result = provider.fetch_keys().await;
        assert_eq!(
            result.err(),
            Some(VerifyError::Network("key endpoint timed out".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_keys_unreachable_is_network_error() {
        let provider = HttpKeyProvider::with_settings(
            "http://127.0.0.1:1/public_key".to_string(),
            Duration::from_secs(300),
            Duration::from_secs(1),
        );

        let result = provider.fetch_keys().await;
        assert!(matches!(result, Err(VerifyError::Network(_))));
    }

    #[tokio::test]
    async fn test_get_key_caches_within_ttl() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 1).await;

        let provider = provider(&server, 300);
        for _ in 0..10 {
            provider.get_key("kid-1").await.unwrap();
        }
        assert!(provider.is_warm().await);
        // MockServer verifies exactly one fetch on drop
    }

    #[tokio::test]
    async fn test_get_key_ttl_zero_fetches_every_time() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 3).await;

        let provider = provider(&server, 0);
        for _ in 0..3 {
            provider.get_key("kid-1").await.unwrap();
        }
        assert!(!provider.is_warm().await);
    }

    #[tokio::test]
    async fn test_get_key_refetches_after_expiry() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 2).await;

        let provider = HttpKeyProvider::with_settings(
            format!("{}/public_key", server.uri()),
            Duration::from_millis(100),
            Duration::from_secs(2),
        );

        provider.get_key("kid-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!provider.is_warm().await);

        provider.get_key("kid-1").await.unwrap();
        assert!(provider.is_warm().await);
    }

    #[tokio::test]
    async fn test_get_key_refetches_on_unknown_kid() {
        let server = MockServer::start().await;
        let old_key = TestSigningKey::generate("old");
        let new_key = TestSigningKey::generate("new");

        // First fetch only knows the old key; the rotated set follows.
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pem_map(&[&old_key])))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_keys(&server, pem_map(&[&old_key, &new_key]), 1).await;

        let provider = provider(&server, 300).with_miss_refresh_interval(Duration::ZERO);

        provider.get_key("old").await.unwrap();
        provider.get_key("new").await.unwrap();
        provider.get_key("old").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_key_unknown_kid_within_miss_interval_does_not_refetch() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 1).await;

        let provider = provider(&server, 300);
        provider.get_key("kid-1").await.unwrap();

        for _ in 0..5 {
            let result = provider.get_key("bogus").await;
            assert_eq!(result.err(), Some(VerifyError::UnknownKey("bogus".to_string())));
        }
    }

    #[tokio::test]
    async fn test_get_key_empty_key_set_is_unknown_key() {
        let server = MockServer::start().await;
        mount_keys(&server, serde_json::json!({}), 1).await;

        let result = provider(&server, 300).get_key("kid-1").await;
        assert_eq!(result.err(), Some(VerifyError::UnknownKey("kid-1".to_string())));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_expired_entry_expired() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pem_map(&[&key])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = HttpKeyProvider::with_settings(
            format!("{}/public_key", server.uri()),
            Duration::from_millis(100),
            Duration::from_secs(2),
        );

        provider.get_key("kid-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = provider.get_key("kid-1").await;
        assert!(matches!(result, Err(VerifyError::Network(_))));
        assert!(!provider.is_warm().await);
    }

    #[tokio::test]
    async fn test_concurrent_cold_lookups_share_one_fetch() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(pem_map(&[&key]))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server, 300));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move { provider.get_key("kid-1").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_failed_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let provider = Arc::new(HttpKeyProvider::with_settings(
            format!("{}/public_key", server.uri()),
            Duration::from_secs(300),
            Duration::from_millis(500),
        ));

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move { provider.get_key("kid-1").await }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(
                result.err(),
                Some(VerifyError::Network("key endpoint timed out".to_string()))
            );
        }

        // One timed-out fetch, not one per queued caller
        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_secs(3),
            "lookups took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_lookup_after_failed_refresh_fetches_again() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        Mock::given(method("GET"))
            .and(path("/public_key"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_keys(&server, pem_map(&[&key]), 1).await;

        let provider = provider(&server, 300);

        let result = provider.get_key("kid-1").await;
        assert!(matches!(result, Err(VerifyError::Network(_))));

        provider.get_key("kid-1").await.unwrap();
        assert!(provider.is_warm().await);
    }

    #[tokio::test]
    async fn test_warm_populates_cache() {
        let server = MockServer::start().await;
        let a = TestSigningKey::generate("a");
        let b = TestSigningKey::generate("b");
        mount_keys(&server, pem_map(&[&a, &b]), 1).await;

        let provider = provider(&server, 300);
        assert!(!provider.is_warm().await);
        assert_eq!(provider.warm().await.unwrap(), 2);
        assert!(provider.is_warm().await);

        provider.get_key("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let server = MockServer::start().await;
        let key = TestSigningKey::generate("kid-1");
        mount_keys(&server, pem_map(&[&key]), 2).await;

        let provider = provider(&server, 300);
        provider.get_key("kid-1").await.unwrap();
        provider.clear_cache().await;
        assert!(!provider.is_warm().await);
        provider.get_key("kid-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_static_provider_resolves_keys() {
        let key = TestSigningKey::generate("kid-1");
        let provider = StaticKeyProvider::new(KeySet::from_pem_map(HashMap::from([(
            key.kid.clone(),
            key.public_key_pem(),
        )])));

        assert!(provider.get_key("kid-1").await.is_ok());
        assert!(matches!(
            provider.get_key("kid-2").await,
            Err(VerifyError::UnknownKey(_))
        ));
        assert!(KeyProvider::is_warm(&provider).await);
    }

    #[test]
    fn test_provider_debug_shows_url() {
        let provider = HttpKeyProvider::new("https://keys.example.com/public_key".to_string());
        let debug_str = format!("{provider:?}");
        assert!(debug_str.contains("https://keys.example.com/public_key"));
        assert_eq!(
            provider.cache_ttl(),
            Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS)
        );
    }
}
