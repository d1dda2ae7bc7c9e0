//! AI error taxonomy and HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use toolbelt_core::ValidationError;
use toolbelt_core::secrets::{COMMON_SECRET_PATTERNS, scrub_secrets};
use toolbelt_providers::{ProviderError, ProviderKind};

/// Failure categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiErrorCode {
    /// No credential presented.
    AuthRequired,
    /// Credential presented but rejected, locally or upstream.
    AuthFailed,
    /// Upstream quota, billing or local daily credits exhausted.
    CreditsExhausted,
    /// Upstream outage, timeout, or unusable response.
    ServiceUnavailable,
    /// Local rate limit exceeded.
    RateLimited,
    /// Request rejected before any upstream call.
    ValidationFailed,
    /// Anything else.
    Unknown,
}

impl AiErrorCode {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::CreditsExhausted => "CREDITS_EXHAUSTED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// HTTP status for this category.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::AuthFailed => StatusCode::FORBIDDEN,
            Self::RateLimited | Self::CreditsExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::CreditsExhausted | Self::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for AiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by AI dispatch and the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AiError {
    /// Human-readable message, free of secrets.
    pub message: String,
    /// Category.
    pub code: AiErrorCode,
    /// Whether retrying later may succeed.
    pub retryable: bool,
}

impl AiError {
    /// Create an error; `retryable` follows the code.
    #[must_use]
    pub fn new(code: AiErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            retryable: code.is_retryable(),
        }
    }

    /// Request rejected before dispatch.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AiErrorCode::ValidationFailed, message)
    }

    /// Local rate limit exceeded.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(
            AiErrorCode::RateLimited,
            "Too many requests, please slow down",
        )
    }

    /// Classify an upstream failure.
    #[must_use]
    pub fn from_provider(provider: ProviderKind, err: &ProviderError) -> Self {
        let detail = scrub_secrets(&err.to_string(), COMMON_SECRET_PATTERNS);
        let code = classify(err);

        tracing::warn!(provider = %provider, code = %code, "Provider call failed: {}", detail);

        let message = match code {
            AiErrorCode::AuthFailed => format!("{provider} rejected the configured credentials"),
            AiErrorCode::CreditsExhausted => {
                format!("{provider} quota exhausted, try again later")
            }
            AiErrorCode::ServiceUnavailable => {
                format!("{provider} is unavailable, try again later")
            }
            _ => format!("{provider} request failed: {detail}"),
        };

        Self::new(code, message)
    }
}

impl From<ValidationError> for AiError {
    fn from(err: ValidationError) -> Self {
        Self::validation(err.to_string())
    }
}

/// Map a provider error onto the taxonomy.
///
/// The upstream HTTP status decides first, then the error variant. Message
/// text is only consulted for 4xx statuses with no meaning of their own.
#[must_use]
pub fn classify(err: &ProviderError) -> AiErrorCode {
    match err.status() {
        Some(401 | 403) => return AiErrorCode::AuthFailed,
        Some(402 | 429) => return AiErrorCode::CreditsExhausted,
        Some(500..=599) => return AiErrorCode::ServiceUnavailable,
        _ => {}
    }

    match err {
        ProviderError::Config(_) => AiErrorCode::AuthFailed,
        ProviderError::Network(_)
        | ProviderError::Serialization(_)
        | ProviderError::MalformedResponse(_) => AiErrorCode::ServiceUnavailable,
        ProviderError::Api { message, .. } => classify_message(message),
        ProviderError::RateLimited { .. } => AiErrorCode::CreditsExhausted,
    }
}

fn classify_message(message: &str) -> AiErrorCode {
    let lower = message.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if mentions(&["quota", "billing", "credit"]) {
        AiErrorCode::CreditsExhausted
    } else if mentions(&["api key", "api_key", "unauthorized"]) {
        AiErrorCode::AuthFailed
    } else if mentions(&["image"]) {
        AiErrorCode::ValidationFailed
    } else {
        AiErrorCode::Unknown
    }
}

impl IntoResponse for AiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "code": self.code,
            "retryable": self.retryable,
        });
        (self.code.status(), Json(body)).into_response()
    }
}
