//! IAP Proxy
//!
//! Entry point for the assertion-verifying reverse proxy.

use iap_proxy::auth::HttpKeyProvider;
use iap_proxy::config::Config;
use iap_proxy::observability::metrics::init_metrics_recorder;
use iap_proxy::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iap_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting IAP Proxy");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        upstream_url = %config.upstream_url,
        iap_audience = %config.iap_audience,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        key_cache_ttl_seconds = config.key_cache_ttl_seconds,
        unauthenticated_paths = config.unauthenticated_paths.len(),
        drain_seconds = config.drain_seconds,
        "Configuration loaded successfully"
    );

    // Must be installed before anything records
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let key_provider = Arc::new(HttpKeyProvider::with_settings(
        config.iap_public_key_url.clone(),
        Duration::from_secs(config.key_cache_ttl_seconds),
        Duration::from_secs(config.key_fetch_timeout_seconds),
    ));

    // Best effort: a cold cache is filled on the first request
    match key_provider.warm().await {
        Ok(count) => info!(key_count = count, "IAP public keys loaded"),
        Err(e) => warn!(error = %e, "Initial IAP key fetch failed, continuing with cold cache"),
    }

    let bind_address = config.bind_address;
    let drain = Duration::from_secs(config.drain_seconds);

    let state = Arc::new(AppState::new(config, key_provider).map_err(|e| {
        error!("Failed to create application state: {}", e);
        e
    })?);

    let app = routes::build_routes(state, metrics_handle);

    info!("IAP Proxy listening on {}", bind_address);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain))
    .await?;

    info!("IAP Proxy shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if !drain.is_zero() {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (IAP_PROXY_DRAIN_SECONDS=0)");
    }
}
