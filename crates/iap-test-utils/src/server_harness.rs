//! Test server harness for E2E testing
//!
//! Provides `TestIapServer` for spawning real proxy instances in tests.

use crate::token_builders::TEST_AUDIENCE;
use iap_proxy::auth::HttpKeyProvider;
use iap_proxy::config::Config;
use iap_proxy::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Test harness for spawning the IAP proxy in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_liveness() -> Result<(), anyhow::Error> {
///     let server = TestIapServer::spawn(&key_url, &upstream_url).await?;
///
///     let response = reqwest::get(format!("{}/_liveness", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestIapServer {
    addr: SocketAddr,
    config: Config,
    key_provider: Arc<HttpKeyProvider>,
    _handle: JoinHandle<()>,
}

impl TestIapServer {
    /// Spawn a proxy that fetches keys from `key_url` and forwards to
    /// `upstream_url`, with `TEST_AUDIENCE` as its audience.
    pub async fn spawn(key_url: &str, upstream_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(key_url, upstream_url, HashMap::new()).await
    }

    /// Like `spawn`, with extra environment variables layered on top.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start with a cold key cache
    /// - Serve with connect info so `X-Forwarded-For` is populated
    pub async fn spawn_with_vars(
        key_url: &str,
        upstream_url: &str,
        extra_vars: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("IAP_AUDIENCE".to_string(), TEST_AUDIENCE.to_string()),
            ("IAP_PUBLIC_KEY_URL".to_string(), key_url.to_string()),
            ("UPSTREAM_URL".to_string(), upstream_url.to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let key_provider = Arc::new(HttpKeyProvider::with_settings(
            config.iap_public_key_url.clone(),
            Duration::from_secs(config.key_cache_ttl_seconds),
            Duration::from_secs(config.key_fetch_timeout_seconds),
        ));

        let state = Arc::new(
            AppState::new(config.clone(), key_provider.clone())
                .map_err(|e| anyhow::anyhow!("Failed to create app state: {}", e))?,
        );

        // Recorder is not installed globally; tests only need the handle
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            key_provider,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the key provider backing the server.
    pub fn key_provider(&self) -> &HttpKeyProvider {
        &self.key_provider
    }
}

impl Drop for TestIapServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
