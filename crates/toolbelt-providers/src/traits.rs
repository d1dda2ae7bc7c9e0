//! Provider traits.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use toolbelt_core::types::TokenUsage;

/// Provider errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// API error.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate limited.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Response parsed but did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// HTTP status the provider answered with, if it answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use.
    pub model: String,

    /// Messages in conversation.
    pub messages: Vec<Message>,

    /// System prompt.
    pub system: Option<String>,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Temperature for sampling.
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Single-turn request for `prompt`.
    #[must_use]
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            system: None,
            max_tokens,
            temperature: None,
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,

    /// Message text.
    pub content: String,
}

impl Message {
    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message.
    User,
    /// Assistant message.
    Assistant,
}

impl Role {
    /// Wire name shared by every supported API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response ID.
    pub id: String,

    /// Model used.
    pub model: String,

    /// Generated text.
    pub text: String,

    /// Stop reason.
    pub stop_reason: Option<StopReason>,

    /// Token usage.
    pub usage: TokenUsage,
}

/// Reason the generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// End of turn.
    EndTurn,
    /// Hit max tokens.
    MaxTokens,
    /// Hit stop sequence.
    StopSequence,
    /// Blocked by a content filter.
    ContentFilter,
}

/// Streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingChunk {
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Text delta.
    pub delta: Option<String>,
    /// Token usage, when the provider reports it mid-stream.
    pub usage: Option<TokenUsage>,
}

impl StreamingChunk {
    /// Text delta chunk.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            chunk_type: ChunkType::ContentDelta,
            delta: Some(delta.into()),
            usage: None,
        }
    }

    /// Usage report chunk.
    #[must_use]
    pub const fn usage(usage: TokenUsage) -> Self {
        Self {
            chunk_type: ChunkType::MessageDelta,
            delta: None,
            usage: Some(usage),
        }
    }

    /// End of message.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            chunk_type: ChunkType::MessageStop,
            delta: None,
            usage: None,
        }
    }
}

/// Type of streaming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Text delta.
    ContentDelta,
    /// Message-level update such as usage.
    MessageDelta,
    /// Message stop.
    MessageStop,
}

/// Stream of chunks from a streaming completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamingChunk, ProviderError>> + Send>>;

/// AI provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Model used when the caller does not pick one.
    fn default_model(&self) -> &str;

    /// Whether `complete_stream` delivers incremental text.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Create a completion.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Create a streaming completion.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>;
}
