//! Core types shared across Toolbelt crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key that partitions rate-limit counters per caller.
///
/// Usually derived from the client network address (`ip:203.0.113.9`)
/// or from an access token fingerprint (`token:3fa1...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKey(pub String);

impl ClientKey {
    /// Create a new client key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a client network address.
    #[must_use]
    pub fn ip(addr: impl fmt::Display) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Key for an authenticated access token fingerprint.
    #[must_use]
    pub fn token(fingerprint: impl fmt::Display) -> Self {
        Self(format!("token:{fingerprint}"))
    }

    /// Namespace the key under an endpoint class (e.g. `ai:ip:1.2.3.4`).
    #[must_use]
    pub fn scoped(&self, class: &str) -> String {
        format!("{class}:{}", self.0)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens.
    pub input_tokens: u64,
    /// Output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Get total tokens used.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_builders() {
        assert_eq!(ClientKey::ip("1.2.3.4").as_ref(), "ip:1.2.3.4");
        assert_eq!(ClientKey::token("abcd").to_string(), "token:abcd");
    }

    #[test]
    fn test_client_key_scoped() {
        let key = ClientKey::ip("1.2.3.4");
        assert_eq!(key.scoped("ai"), "ai:ip:1.2.3.4");
        assert_eq!(key.scoped("general"), "general:ip:1.2.3.4");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 12,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 42);
    }
}
