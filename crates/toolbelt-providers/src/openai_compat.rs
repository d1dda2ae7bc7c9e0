//! OpenAI-compatible chat completions (Groq, OpenRouter).

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

const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";

/// Default Groq model.
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Default `OpenRouter` model.
pub const OPENROUTER_DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Client for any `/v1/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    client: Client,
    name: &'static str,
    api_key: ApiKey,
    base_url: String,
    default_model: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create a provider for an arbitrary compatible endpoint.
    #[must_use]
    pub fn new(
        name: &'static str,
        api_key: ApiKey,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            name,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            referer: None,
            title: None,
        }
    }

    /// Groq preset.
    #[must_use]
    pub fn groq(api_key: ApiKey) -> Self {
        Self::new("groq", api_key, GROQ_BASE_URL, GROQ_DEFAULT_MODEL)
    }

    /// `OpenRouter` preset.
    #[must_use]
    pub fn openrouter(api_key: ApiKey) -> Self {
        Self::new(
            "openrouter",
            api_key,
            OPENROUTER_BASE_URL,
            OPENROUTER_DEFAULT_MODEL,
        )
    }

    /// Override the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the default model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Send `HTTP-Referer` and `X-Title` attribution headers (`OpenRouter`).
    #[must_use]
    pub fn with_attribution(mut self, referer: Option<String>, title: impl Into<String>) -> Self {
        self.referer = referer;
        self.title = Some(title.into());
        self
    }

    fn to_openai_request<'a>(
        &self,
        request: &'a CompletionRequest,
        stream: bool,
    ) -> ChatRequest<'a> {
        let system = request.system.as_deref().map(|content| ChatMessage {
            role: "system",
            content,
        });

        let messages = system
            .into_iter()
            .chain(request.messages.iter().map(|m| ChatMessage {
                role: m.role.as_str(),
                content: &m.content,
            }))
            .collect();

        ChatRequest {
            model: &request.model,
            messages,
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
        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&self.to_openai_request(request, stream));

        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }

        check_status(builder.send().await?).await
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&request, false).await?;
        let result: ChatResponse = response.json().await?;

        // OpenRouter reports some upstream failures inside a 200 body
        if let Some(error) = result.error {
            return Err(error.into());
        }

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".to_string()))?;

        Ok(CompletionResponse {
            id: result.id.unwrap_or_default(),
            model: result.model.unwrap_or(request.model),
            text: choice.message.content.unwrap_or_default(),
            stop_reason: choice.finish_reason.as_deref().and_then(parse_finish_reason),
            usage: result.usage.map(Into::into).unwrap_or_default(),
        })
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>  {
        let response = self.send(&request, true).await?;
        Ok(decode_chunks(
            Box::pin(response.bytes_stream()),
            parse_stream_event,
        ))
    }
}

fn parse_finish_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "length" => Some(StopReason::MaxTokens),
        "content_filter" => Some(StopReason::ContentFilter),
        _ => None,
    }
}

/// Parse one `chat.completion.chunk` event.
fn parse_stream_event(data: &str) -> Result<Option<StreamingChunk>, ProviderError> {
    let chunk: ChatChunk = serde_json::from_str(data)?;

    if let Some(error) = chunk.error {
        return Err(error.into());
    }

    let usage = chunk
        .usage
        .or_else(|| chunk.x_groq.and_then(|x| x.usage))
        .map(TokenUsage::from);

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty());

    Ok(match (delta, usage) {
        (Some(text), Some(usage)) => Some(StreamingChunk {
            usage: Some(usage),
            ..StreamingChunk::text(text)
        }),
        (Some(text), None) => Some(StreamingChunk::text(text)),
        (None, Some(usage)) => Some(StreamingChunk::usage(usage)),
        (None, None) => None,
    })
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    x_groq: Option<GroqExtension>,
    #[serde(default)]
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqExtension {
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    message: String,
}

impl From<ChatUsage> for TokenUsage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

impl From<ChatError> for ProviderError {
    fn from(error: ChatError) -> Self {
        let status = error
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(502);
        Self::Api {
            status,
            message: error.message,
        }
    }
}
