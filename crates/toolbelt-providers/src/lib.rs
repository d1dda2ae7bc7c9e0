//! # Toolbelt Providers
//!
//! Clients for the hosted model APIs the gateway dispatches to: Anthropic,
//! Groq and `OpenRouter` (OpenAI-compatible), and Google Gemini.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anthropic;
pub mod gemini;
mod http;
pub mod kind;
pub mod openai_compat;
pub mod registry;
pub mod sse;
pub mod traits;
mod usage;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use kind::{ProviderKind, UnknownProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use sse::SseDecoder;
pub use traits::{
    ChunkStream, ChunkType, CompletionRequest, CompletionResponse, Message, Provider,
    ProviderError, Role, StopReason, StreamingChunk,
};
pub use usage::{TokenUsageSummary, UsageTracker};
