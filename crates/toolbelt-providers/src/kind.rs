//! Supported provider identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Provider name that matches no supported provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown provider '{0}' (expected one of: anthropic, groq, gemini, openrouter)")]
pub struct UnknownProvider(pub String);

/// Hosted model APIs the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// Groq (OpenAI-compatible).
    Groq,
    /// Google Gemini.
    Gemini,
    /// `OpenRouter` (OpenAI-compatible).
    OpenRouter,
}

impl ProviderKind {
    /// Every supported provider.
    pub const ALL: [Self; 4] = [Self::Anthropic, Self::Groq, Self::Gemini, Self::OpenRouter];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Groq => "groq",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Model used when neither the request nor the config names one.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => crate::anthropic::DEFAULT_MODEL,
            Self::Groq => crate::openai_compat::GROQ_DEFAULT_MODEL,
            Self::Gemini => crate::gemini::DEFAULT_MODEL,
            Self::OpenRouter => crate::openai_compat::OPENROUTER_DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownProvider(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Anthropic".parse(), Ok(ProviderKind::Anthropic));
        assert_eq!(" GROQ ".parse(), Ok(ProviderKind::Groq));
        assert_eq!("openRouter".parse(), Ok(ProviderKind::OpenRouter));
        assert_eq!(
            "openai".parse::<ProviderKind>(),
            Err(UnknownProvider("openai".to_string()))
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::OpenRouter).unwrap(),
            r#""openrouter""#
        );
        let kind: ProviderKind = serde_json::from_str(r#""gemini""#).unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
    }

    #[test]
    fn test_display_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.to_string().parse(), Ok(kind));
        }
    }
}
