//! Google Gemini API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::check_status;
use crate::sse::decode_chunks;
use crate::traits::{
    ChunkStream, CompletionRequest, CompletionResponse, Provider, ProviderError, Role, StopReason,
    StreamingChunk,
};
use toolbelt_core::secrets::ApiKey;
use toolbelt_core::types::TokenUsage;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    default_model: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
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

    fn to_gemini_request<'a>(&self, request: &'a CompletionRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: request
                .messages
                .iter()
                .map(|m| Content {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            system_instruction: request.system.as_deref().map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        method: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:{method}",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&self.to_gemini_request(request))
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&request, "generateContent").await?;
        let result: GenerateResponse = response.json().await?;

        if result.candidates.is_empty() {
            return Err(blocked_error(result.prompt_feedback));
        }

        let stop_reason = result
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .and_then(parse_finish_reason);

        Ok(CompletionResponse {
            id: result.response_id.unwrap_or_default(),
            model: result.model_version.unwrap_or(request.model),
            text: candidate_text(result.candidates),
            stop_reason,
            usage: result.usage_metadata.map(Into::into).unwrap_or_default(),
        })
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>  {
        let response = self
            .send(&request, "streamGenerateContent?alt=sse")
            .await?;
        Ok(decode_chunks(
            Box::pin(response.bytes_stream()),
            parse_stream_event,
        ))
    }
}

fn candidate_text(candidates: Vec<Candidate>) -> String {
    candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default()
}

fn blocked_error(feedback: Option<PromptFeedback>) -> ProviderError {
    match feedback.and_then(|f| f.block_reason) {
        Some(reason) => ProviderError::Api {
            status: 400,
            message: format!("prompt blocked: {reason}"),
        },
        None => ProviderError::MalformedResponse("no candidates in response".to_string()),
    }
}

fn parse_finish_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "STOP" => Some(StopReason::EndTurn),
        "MAX_TOKENS" => Some(StopReason::MaxTokens),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
            Some(StopReason::ContentFilter)
        }
        _ => None,
    }
}

/// Parse one streamed `GenerateContentResponse`.
fn parse_stream_event(data: &str) -> Result<Option<StreamingChunk>, ProviderError> {
    let event: GenerateResponse = serde_json::from_str(data)?;

    if event.candidates.is_empty() && event.usage_metadata.is_none() {
        return Err(blocked_error(event.prompt_feedback));
    }

    let usage = event.usage_metadata.map(TokenUsage::from);
    let text = candidate_text(event.candidates);

    Ok(match (text.is_empty(), usage) {
        (false, usage) => Some(StreamingChunk {
            usage,
            ..StreamingChunk::text(text)
        }),
        (true, Some(usage)) => Some(StreamingChunk::usage(usage)),
        (true, None) => None,
    })
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(usage: UsageMetadata) -> Self {
        Self {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Message;

    #[test]
    fn test_request_conversion() {
        let provider = GeminiProvider::new(ApiKey::from("k"));
        let mut request = CompletionRequest::prompt("gemini-2.0-flash", "Hi", 256);
        request.system = Some("Be brief".to_string());
        request.temperature = Some(0.5);
        request.messages.push(Message {
            role: Role::Assistant,
            content: "Hello".to_string(),
        });

        let body = serde_json::to_value(provider.to_gemini_request(&request)).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn test_stream_event_text_and_usage() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2}}"#;
        let chunk = parse_stream_event(data).unwrap().unwrap();
        assert_eq!(chunk.delta.as_deref(), Some("Hello"));
        assert_eq!(chunk.usage.unwrap().total(), 6);
    }

    #[test]
    fn test_blocked_prompt() {
        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(
            parse_stream_event(data),
            Err(ProviderError::Api { status: 400, .. })
        ));
    }

    #[test]
    fn test_finish_reasons() {
        assert_eq!(parse_finish_reason("STOP"), Some(StopReason::EndTurn));
        assert_eq!(parse_finish_reason("MAX_TOKENS"), Some(StopReason::MaxTokens));
        assert_eq!(parse_finish_reason("SAFETY"), Some(StopReason::ContentFilter));
        assert_eq!(parse_finish_reason("OTHER"), None);
    }
}
