//! Access policy for the AI endpoints.

use toolbelt_core::ApiKey;
use toolbelt_core::types::ClientKey;

use crate::error::{AiError, AiErrorCode};

/// Bearer-token gate.
///
/// With no tokens configured every caller is admitted and identified by
/// network address. Otherwise callers must present one of the tokens and
/// are identified by its fingerprint.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    tokens: Vec<ApiKey>,
}

impl AccessPolicy {
    /// Policy accepting `tokens`; blank tokens are ignored.
    #[must_use]
    pub fn new(tokens: Vec<ApiKey>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_blank()).collect(),
        }
    }

    /// Policy that admits everyone.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Whether no token is required.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resolve the subject that quotas are charged to.
    ///
    /// # Errors
    ///
    /// `AUTH_REQUIRED` when a token is required but none was sent,
    /// `AUTH_FAILED` when the token is malformed or unknown.
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        client: &ClientKey,
    ) -> Result<ClientKey, AiError> {
        if self.is_open() {
            return Ok(client.clone());
        }

        let header = authorization
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                AiError::new(AiErrorCode::AuthRequired, "Sign in to use AI tools")
            })?;

        let token = bearer_token(header).ok_or_else(|| {
            AiError::new(AiErrorCode::AuthFailed, "Expected a Bearer access token")
        })?;

        self.tokens
            .iter()
            .find(|key| key.matches(token))
            .map(|key| ClientKey::token(key.fingerprint()))
            .ok_or_else(|| {
                tracing::debug!(client = %client, "Rejected unknown access token");
                AiError::new(AiErrorCode::AuthFailed, "Invalid access token")
            })
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientKey {
        ClientKey::ip("203.0.113.9")
    }

    #[test]
    fn test_open_policy_uses_client_key() {
        let policy = AccessPolicy::new(vec![ApiKey::from("  ")]);
        assert!(policy.is_open());
        assert_eq!(policy.authorize(None, &client()).unwrap(), client());
    }

    #[test]
    fn test_missing_token_is_auth_required() {
        let policy = AccessPolicy::new(vec![ApiKey::from("secret")]);
        let err = policy.authorize(None, &client()).unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthRequired);
    }

    #[test]
    fn test_unknown_or_malformed_token_is_auth_failed() {
        let policy = AccessPolicy::new(vec![ApiKey::from("secret")]);

        let err = policy.authorize(Some("Bearer nope"), &client()).unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthFailed);

        let err = policy.authorize(Some("Basic c2VjcmV0"), &client()).unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthFailed);

        let err = policy.authorize(Some("secret"), &client()).unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthFailed);
    }

    #[test]
    fn test_valid_token_identifies_by_fingerprint() {
        let key = ApiKey::from("secret");
        let policy = AccessPolicy::new(vec![ApiKey::from("other"), key.clone()]);

        let subject = policy.authorize(Some("bearer  secret "), &client()).unwrap();
        assert_eq!(subject, ClientKey::token(key.fingerprint()));
        assert!(!subject.as_ref().contains("secret"));
    }
}
