//! Health and metrics endpoint integration tests.
//!
//! Operational endpoints are served by the proxy itself and never require
//! an assertion.

use iap_test_utils::{public_key_map, TestIapServer, TestSigningKey, TestTokenBuilder};
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    key: TestSigningKey,
    _key_server: MockServer,
    upstream: MockServer,
    server: TestIapServer,
}

async fn fixture() -> Result<Fixture, anyhow::Error> {
    let key = TestSigningKey::generate("kid-1");

    let key_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(public_key_map(&[&key])))
        .mount(&key_server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let server = TestIapServer::spawn(
        &format!("{}/public_key", key_server.uri()),
        &upstream.uri(),
    )
    .await?;

    Ok(Fixture {
        key,
        _key_server: key_server,
        upstream,
        server,
    })
}

/// Test that /_liveness returns 200 and plain text "OK" without an assertion.
#[tokio::test]
async fn test_liveness_endpoint_returns_200() -> Result<(), anyhow::Error> {
    let f = fixture().await?;

    let response = reqwest::get(format!("{}/_liveness", f.server.url())).await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "OK");
    assert!(f.upstream.received_requests().await.unwrap_or_default().is_empty());

    Ok(())
}

/// Test that /_readiness reports a cold cache, then warm after a verification.
#[tokio::test]
async fn test_readiness_reports_key_cache_state() -> Result<(), anyhow::Error> {
    let f = fixture().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/_readiness", f.server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    assert!(
        content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json")),
        "Expected application/json content type, got {content_type:?}"
    );

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["key_cache"], "cold");

    let response = client
        .get(format!("{}/app", f.server.url()))
        .header("x-goog-iap-jwt-assertion", TestTokenBuilder::new().sign(&f.key))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = client
        .get(format!("{}/_readiness", f.server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["key_cache"], "warm");

    Ok(())
}

/// Test that the readiness probe turns warm after an explicit warm-up.
#[tokio::test]
async fn test_readiness_after_warm_up() -> Result<(), anyhow::Error> {
    let f = fixture().await?;

    let count = f.server.key_provider().warm().await?;
    assert_eq!(count, 1);

    let body: serde_json::Value = reqwest::get(format!("{}/_readiness", f.server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(body["key_cache"], "warm");

    Ok(())
}

/// Test that /_metrics is served without an assertion.
#[tokio::test]
async fn test_metrics_endpoint_bypasses_gate() -> Result<(), anyhow::Error> {
    let f = fixture().await?;

    let response = reqwest::get(format!("{}/_metrics", f.server.url())).await?;

    assert_eq!(response.status(), 200);
    assert!(f.upstream.received_requests().await.unwrap_or_default().is_empty());

    Ok(())
}

/// Test that any other path is gated rather than 404.
#[tokio::test]
async fn test_unknown_path_is_gated() -> Result<(), anyhow::Error> {
    let f = fixture().await?;

    let response = reqwest::get(format!("{}/v1/nonexistent", f.server.url())).await?;

    assert_eq!(response.status(), 401);

    Ok(())
}
