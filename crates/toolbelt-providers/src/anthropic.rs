//! Anthropic Claude API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::check_status;
use crate::sse::decode_chunks;
use crate::traits::{
    ChunkStream, CompletionRequest, CompletionResponse, Provider, ProviderError, StopReason,
    StreamingChunk,
};
use toolbelt_core::secrets::ApiKey;
use toolbelt_core::types::TokenUsage;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default Anthropic model.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Anthropic API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    #[must_use]
    pub fn new(api_key: ApiKey) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create with custom base URL.
    #[must_use]
    pub fn with_base_url(api_key: ApiKey, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the default model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn to_anthropic_request<'a>(
        &self,
        request: &'a CompletionRequest,
        stream: bool,
    ) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            system: request.system.as_deref(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.to_anthropic_request(request, stream))
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&request, false).await?;
        let result: AnthropicResponse = response.json().await?;
        Ok(result.into())
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>  {
        let response = self.send(&request, true).await?;

        let mut input_tokens = 0;
        Ok(decode_chunks(Box::pin(response.bytes_stream()), move |data| {
            parse_stream_event(data, &mut input_tokens)
        }))
    }
}

/// Parse one Anthropic streaming event.
///
/// Input tokens arrive in `message_start` and output tokens in
/// `message_delta`, so the former is carried between calls.
fn parse_stream_event(
    data: &str,
    input_tokens: &mut u64,
) -> Result<Option<StreamingChunk>, ProviderError> {
    let event: AnthropicStreamEvent = serde_json::from_str(data)?;

    let chunk = match event {
        AnthropicStreamEvent::MessageStart { message } => {
            *input_tokens = message.usage.input_tokens;
            None
        }
        AnthropicStreamEvent::ContentBlockDelta { delta } => {
            delta.text.filter(|t| !t.is_empty()).map(StreamingChunk::text)
        }
        AnthropicStreamEvent::MessageDelta { usage } => usage.map(|u| {
            StreamingChunk::usage(TokenUsage {
                input_tokens: *input_tokens,
                output_tokens: u.output_tokens,
            })
        }),
        AnthropicStreamEvent::MessageStop => Some(StreamingChunk::stop()),
        AnthropicStreamEvent::Error { error } => {
            let status = match error.error_type.as_str() {
                "overloaded_error" => 529,
                "rate_limit_error" => 429,
                "authentication_error" => 401,
                "invalid_request_error" => 400,
                _ => 500,
            };
            return Err(ProviderError::Api {
                status,
                message: error.message,
            });
        }
        AnthropicStreamEvent::Other => None,
    };

    Ok(chunk)
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl From<AnthropicResponse> for CompletionResponse {
    fn from(resp: AnthropicResponse) -> Self {
        let text = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        Self {
            id: resp.id,
            model: resp.model,
            text,
            stop_reason: resp.stop_reason.and_then(|s| match s.as_str() {
                "end_turn" => Some(StopReason::EndTurn),
                "max_tokens" => Some(StopReason::MaxTokens),
                "stop_sequence" => Some(StopReason::StopSequence),
                _ => None,
            }),
            usage: TokenUsage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
        }
    }
}
