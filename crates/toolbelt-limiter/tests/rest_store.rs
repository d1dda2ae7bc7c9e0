//! Remote counter store tests against a mock REST endpoint.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use toolbelt_core::ApiKey;
use toolbelt_limiter::{
    CounterStore, FixedWindowLimiter, ManualClock, RateLimitConfig, RestStore, StoreError,
    WindowRecord,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_store(mock_server: &MockServer) -> RestStore {
    RestStore::new(
        mock_server.uri(),
        ApiKey::from("test-token"),
        "test",
        Duration::from_millis(500),
    )
    .unwrap()
}

#[tokio::test]
async fn test_get_parses_hash_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!([["HMGET", "test:ai:ip:1.2.3.4", "count", "start"]])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "result": ["3", "1700000000000"] }])),
        )
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    let record = store.get("ai:ip:1.2.3.4").await.unwrap();
    assert_eq!(
        record,
        Some(WindowRecord {
            count: 3,
            window_start_ms: 1_700_000_000_000,
        })
    );
}

#[tokio::test]
async fn test_get_missing_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "result": [null, null] }])))
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_with_expiry_sends_hset_and_pexpire() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .and(body_json(json!([
            ["HSET", "test:k", "count", "1", "start", "5000"],
            ["PEXPIRE", "test:k", "60000"],
        ])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "result": 2 }, { "result": 1 }])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    store
        .set_with_expiry(
            "k",
            WindowRecord {
                count: 1,
                window_start_ms: 5000,
            },
            60_000,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_increment_on_vanished_key_returns_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "result": null }])))
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    assert_eq!(store.increment("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_increment_returns_new_count() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "result": 4 }])))
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    assert_eq!(store.increment("k").await.unwrap(), Some(4));
}

#[tokio::test]
async fn test_command_error_surfaces() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "error": "WRONGTYPE Operation against a key" }])),
        )
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    assert!(matches!(
        store.get("k").await,
        Err(StoreError::Command(message)) if message.starts_with("WRONGTYPE")
    ));
}

#[tokio::test]
async fn test_unauthorized_surfaces_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    assert!(matches!(
        store.get("k").await,
        Err(StoreError::Status { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_non_ascii_error_body_is_truncated_cleanly() {
    let mock_server = MockServer::start().await;

    let body = format!("a{}", "é".repeat(150));
    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(500).set_body_string(body))
        .mount(&mock_server)
        .await;

    let store = create_store(&mock_server);
    match store.get("k").await {
        Err(StoreError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert!(message.len() <= 200);
            assert!(message.starts_with("aé"));
        }
        other => panic!("expected status error, got {other:?}"),
    }

    let limiter = FixedWindowLimiter::new(Arc::new(ManualClock::new(0)))
        .with_primary(Arc::new(store));
    let result = limiter
        .check_rate_limit("ip:1.2.3.4", &RateLimitConfig::new(2, 1000))
        .await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 1);
}

#[tokio::test]
async fn test_limiter_degrades_when_remote_store_is_down() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let limiter = FixedWindowLimiter::new(Arc::new(ManualClock::new(0)))
        .with_primary(Arc::new(create_store(&mock_server)));
    let config = RateLimitConfig::new(2, 1000);

    let first = limiter.check_rate_limit("ip:1.2.3.4", &config).await;
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);

    limiter.check_rate_limit("ip:1.2.3.4", &config).await;
    assert!(!limiter.check_rate_limit("ip:1.2.3.4", &config).await.allowed);
}

#[tokio::test]
async fn test_limiter_uses_remote_window() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .and(body_json(json!([["HMGET", "test:k", "count", "start"]])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "result": ["1", "0"] }])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "result": 2 }])))
        .mount(&mock_server)
        .await;

    let limiter = FixedWindowLimiter::new(Arc::new(ManualClock::new(100)))
        .with_primary(Arc::new(create_store(&mock_server)));

    let result = limiter
        .check_rate_limit("k", &RateLimitConfig::new(5, 1000))
        .await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 3);
    assert_eq!(result.reset_at_ms, 1000);
}
