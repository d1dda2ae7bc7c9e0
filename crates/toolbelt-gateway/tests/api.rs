//! End-to-end tests for the gateway router against a mock Anthropic API.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use toolbelt_core::config::RateLimitSettings;
use toolbelt_core::{ApiKey, Config};
use toolbelt_gateway::Gateway;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_BODY: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

fn config(mock_server: &MockServer) -> Config {
    let mut config = Config::default();
    config.providers.anthropic.api_key = Some(ApiKey::from("test-api-key"));
    config.providers.anthropic.base_url = Some(mock_server.uri());
    config
}

fn app(config: &Config) -> Router {
    Gateway::from_app_config(config).unwrap().router()
}

fn ai_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ai")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "1.2.3.4")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn mount_reply(mock_server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-20241022",
            "content": [{ "type": "text", "text": text }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 3 }
        })))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_say_hi_returns_text() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, "Hi!").await;

    let response = app(&config(&mock_server))
        .oneshot(ai_request(json!({ "prompt": "Say hi", "provider": "anthropic" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");

    let body = body_json(response).await;
    assert_eq!(body["text"], "Hi!");
    assert_eq!(body["provider"], "anthropic");
    assert_eq!(body["model"], "claude-3-5-haiku-20241022");
}

#[tokio::test]
async fn test_streaming_sends_deltas_then_done() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(STREAM_BODY),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut request = ai_request(json!({ "prompt": "Say hi", "provider": "anthropic" }));
    request
        .headers_mut()
        .insert("accept", "text/event-stream".parse().unwrap());

    let response = app(&config(&mock_server)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert_eq!(
        body,
        "data: {\"text\":\"Hi\"}\n\ndata: {\"text\":\" there\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_upstream_failure_mid_stream_sends_error_frame() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": { "type": "authentication_error", "message": "invalid x-api-key" }
        })))
        .mount(&mock_server)
        .await;

    let response = app(&config(&mock_server))
        .oneshot(ai_request(
            json!({ "prompt": "Say hi", "provider": "anthropic", "stream": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(body.contains("\"code\":\"AUTH_FAILED\""));
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert!(!body.contains("test-api-key"));
}

#[tokio::test]
async fn test_invalid_upstream_key_is_auth_failed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": { "type": "authentication_error", "message": "invalid x-api-key" }
        })))
        .mount(&mock_server)
        .await;

    let response = app(&config(&mock_server))
        .oneshot(ai_request(json!({ "prompt": "Say hi", "provider": "anthropic" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "AUTH_FAILED");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_upstream_outage_is_retryable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("Overloaded"))
        .mount(&mock_server)
        .await;

    let response = app(&config(&mock_server))
        .oneshot(ai_request(json!({ "prompt": "Say hi", "provider": "anthropic" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_ai_rate_limit_blocks_before_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "model": "claude-3-5-haiku-20241022",
            "content": [{ "type": "text", "text": "ok" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 1, "output_tokens": 1 }
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = config(&mock_server);
    config.limits.ai = RateLimitSettings {
        max_requests: 2,
        window_ms: 60_000,
    };
    let app = app(&config);

    for remaining in ["1", "0"] {
        let response = app
            .clone()
            .oneshot(ai_request(json!({ "prompt": "hi", "provider": "anthropic" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = app
        .oneshot(ai_request(json!({ "prompt": "hi", "provider": "anthropic" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_general_limit_applies_to_every_api_route() {
    let mock_server = MockServer::start().await;
    let mut config = config(&mock_server);
    config.limits.general = RateLimitSettings {
        max_requests: 1,
        window_ms: 60_000,
    };
    let app = app(&config);

    let providers = || {
        Request::get("/api/providers")
            .header("x-real-ip", "5.6.7.8")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(providers()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "1");

    let response = app.clone().oneshot(providers()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Health is outside /api
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_access_tokens_gate_ai_routes() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, "Hi!").await;

    let mut config = config(&mock_server);
    config.access.tokens = vec![ApiKey::from("team-token")];
    let app = app(&config);

    let response = app
        .clone()
        .oneshot(ai_request(json!({ "prompt": "hi", "provider": "anthropic" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "AUTH_REQUIRED");

    let mut request = ai_request(json!({ "prompt": "hi", "provider": "anthropic" }));
    request
        .headers_mut()
        .insert("authorization", "Bearer wrong".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "AUTH_FAILED");

    let mut request = ai_request(json!({ "prompt": "hi", "provider": "anthropic" }));
    request
        .headers_mut()
        .insert("authorization", "Bearer team-token".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_daily_credits_exhausted() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, "Hi!").await;

    let mut config = config(&mock_server);
    config.limits.daily_credits = Some(1);
    let app = app(&config);

    let response = app
        .clone()
        .oneshot(ai_request(json!({ "prompt": "hi", "provider": "anthropic" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(ai_request(json!({ "prompt": "hi", "provider": "anthropic" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CREDITS_EXHAUSTED");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_invalid_requests_never_reach_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;
    let app = app(&config(&mock_server));

    let cases = [
        json!({ "prompt": "   ", "provider": "anthropic" }),
        json!({ "prompt": "hi", "provider": "mistral" }),
        json!({ "prompt": "hi", "provider": "anthropic", "model": "bad model name!" }),
        json!({ "provider": "anthropic" }),
    ];

    for case in cases {
        let response = app.clone().oneshot(ai_request(case)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["retryable"], false);
    }
}
