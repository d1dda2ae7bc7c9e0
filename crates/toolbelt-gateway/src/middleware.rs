//! Gateway middleware.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use toolbelt_core::types::ClientKey;
use toolbelt_limiter::{FixedWindowLimiter, RateLimitConfig, RateLimitResult};

use crate::error::AiError;

/// `X-RateLimit-Limit` header.
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining` header.
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Identify the caller by network address.
///
/// Proxies are trusted: the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`, then the socket peer.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientKey {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let forwarded = header(&X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded.or_else(|| header(&X_REAL_IP)) {
        Some(addr) => ClientKey::ip(addr),
        None => peer.map_or_else(|| ClientKey::ip("unknown"), |p| ClientKey::ip(p.ip())),
    }
}

/// Set `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(result.remaining));
}

/// 429 response for a denied check, with `Retry-After`.
#[must_use]
pub fn rate_limited_response(result: &RateLimitResult, now_ms: u64) -> Response {
    let mut response = AiError::rate_limited().into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, result);
    headers.insert(
        header::RETRY_AFTER,
        HeaderValue::from(result.retry_after_secs(now_ms)),
    );
    response
}

/// Limit applied to every `/api` route.
#[derive(Clone)]
pub struct GeneralLimit {
    /// Shared limiter.
    pub limiter: Arc<FixedWindowLimiter>,
    /// Per-client allowance.
    pub config: RateLimitConfig,
}

/// General-class rate limit.
///
/// Resolves the [`ClientKey`] and stores it as a request extension for the
/// handlers. Headers set by a handler with a stricter class are kept.
pub async fn general_rate_limit(
    State(limit): State<GeneralLimit>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);

    let result = limit
        .limiter
        .check_rate_limit(&client.scoped("general"), &limit.config)
        .await;

    if !result.allowed {
        tracing::debug!(client = %client, "General rate limit exceeded");
        return rate_limited_response(&result, limit.limiter.now_ms());
    }

    request.extensions_mut().insert(client);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if !headers.contains_key(&X_RATELIMIT_LIMIT) {
        apply_rate_limit_headers(headers, &result);
    }
    response
}

/// CORS for browser clients.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            X_RATELIMIT_LIMIT.clone(),
            X_RATELIMIT_REMAINING.clone(),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(3600))
}
