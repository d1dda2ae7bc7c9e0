//! AI dispatch.
//!
//! One prompt, one provider, one upstream call. There is no retry and no
//! failover to another provider; the caller's choice of provider stands.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use toolbelt_core::config::ProvidersConfig;
use toolbelt_core::types::TokenUsage;
use toolbelt_core::validation::{validate_model_name, validate_prompt};
use toolbelt_providers::{
    CompletionRequest, Provider, ProviderError, ProviderKind, ProviderRegistry, UsageTracker,
};

use crate::error::{AiError, AiErrorCode};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the running text while a completion streams in.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReply {
    /// Generated text, never blank.
    pub text: String,
    /// Provider that produced it.
    pub provider: ProviderKind,
    /// Model that produced it.
    pub model: String,
}

/// Dispatches prompts to configured providers.
pub struct AiGateway {
    registry: ProviderRegistry,
    usage: Arc<UsageTracker>,
    max_output_tokens: u32,
    timeout: Duration,
}

impl AiGateway {
    /// Create a gateway over `registry`.
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            usage: Arc::new(UsageTracker::new()),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build providers, limits and timeout from configuration.
    #[must_use]
    pub fn from_config(config: &ProvidersConfig, app_url: Option<&str>) -> Self {
        Self::new(ProviderRegistry::from_config(config, app_url))
            .with_max_output_tokens(config.max_output_tokens)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    /// Upper bound on generated tokens per request.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Ceiling on a whole upstream call, streaming included.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured providers.
    #[must_use]
    pub const fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Token usage recorded so far.
    #[must_use]
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Send `prompt` to `provider` and return the complete text.
    ///
    /// With `on_chunk`, the running concatenation is passed on every
    /// increment when the provider streams, or once with the full text when
    /// it does not. The returned text equals the last value passed.
    ///
    /// # Errors
    ///
    /// `VALIDATION_FAILED` for a blank or oversized prompt or a bad model
    /// name, `AUTH_FAILED` when the provider has no credential, and the
    /// classified upstream error otherwise. A timeout or a blank result is
    /// `SERVICE_UNAVAILABLE`.
    pub async fn call_ai(
        &self,
        prompt: &str,
        provider: ProviderKind,
        model: Option<&str>,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<AiReply, AiError> {
        let prompt = validate_prompt(prompt)?;
        if let Some(model) = model {
            validate_model_name(model)?;
        }

        let client = self.registry.get(provider).ok_or_else(|| {
            AiError::new(
                AiErrorCode::AuthFailed,
                format!("{provider} is not configured on this server"),
            )
        })?;

        let model = model.map_or_else(|| client.default_model().to_string(), str::to_string);
        let request = CompletionRequest::prompt(&model, prompt, self.max_output_tokens);

        debug!(
            provider = %provider,
            model = %model,
            streaming = on_chunk.is_some(),
            "Dispatching prompt"
        );

        let call = run(client.as_ref(), request, on_chunk);
        let (text, usage) = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(
                    provider = %provider,
                    timeout = ?self.timeout,
                    "Provider call timed out"
                );
                AiError::new(
                    AiErrorCode::ServiceUnavailable,
                    format!(
                        "{provider} did not respond within {}s",
                        self.timeout.as_secs()
                    ),
                )
            })?
            .map_err(|e| AiError::from_provider(provider, &e))?;

        if text.trim().is_empty() {
            return Err(AiError::new(
                AiErrorCode::ServiceUnavailable,
                format!("{provider} returned an empty response"),
            ));
        }

        self.usage.record(provider.as_str(), &model, &usage);

        Ok(AiReply {
            text,
            provider,
            model,
        })
    }
}

async fn run(
    client: &dyn Provider,
    request: CompletionRequest,
    on_chunk: Option<ChunkCallback<'_>>,
) -> Result<(String, TokenUsage), ProviderError> {
    match on_chunk {
        Some(on_chunk) if client.supports_streaming() => {
            let mut stream = client.complete_stream(request).await?;
            let mut text = String::new();
            let mut usage = TokenUsage::default();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if let Some(reported) = chunk.usage {
                    usage = reported;
                }
                if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                    text.push_str(&delta);
                    on_chunk(&text);
                }
            }

            Ok((text, usage))
        }
        on_chunk => {
            let response = client.complete(request).await?;
            if let Some(on_chunk) = on_chunk {
                if !response.text.trim().is_empty() {
                    on_chunk(&response.text);
                }
            }
            Ok((response.text, response.usage))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolbelt_providers::{ChunkStream, CompletionResponse, StreamingChunk};

    /// Scripted provider.
    struct MockProvider {
        deltas: Vec<&'static str>,
        streaming: bool,
        failure: Option<u16>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockProvider {
        fn replying(deltas: Vec<&'static str>) -> Self {
            Self {
                deltas,
                streaming: true,
                failure: None,
                delay: None,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                failure: Some(status),
                ..Self::replying(vec![])
            }
        }

        fn result(&self, request: CompletionRequest) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            match self.failure {
                Some(status) => Err(ProviderError::Api {
                    status,
                    message: "scripted failure".to_string(),
                }),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-default"
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let model = request.model.clone();
            self.result(request)?;
            Ok(CompletionResponse {
                id: "r1".to_string(),
                model,
                text: self.deltas.concat(),
                stop_reason: None,
                usage: TokenUsage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
            })
        }

        async fn complete_stream(
            &self,
            request: CompletionRequest,
        ) -> Result<ChunkStream, ProviderError> {
            self.result(request)?;
            let mut chunks: Vec<Result<StreamingChunk, ProviderError>> = self
                .deltas
                .iter()
                .map(|d| Ok(StreamingChunk::text(*d)))
                .collect();
            chunks.push(Ok(StreamingChunk::usage(TokenUsage {
                input_tokens: 3,
                output_tokens: 2,
            })));
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn build(provider: MockProvider) -> (AiGateway, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderKind::Anthropic, provider.clone());
        (AiGateway::new(registry).with_max_output_tokens(256), provider)
    }

    #[tokio::test]
    async fn test_streaming_passes_running_text() {
        let (gateway, provider) = build(MockProvider::replying(vec!["Hel", "lo", "!"]));
        let mut seen = Vec::new();
        let mut on_chunk = |text: &str| seen.push(text.to_string());

        let reply = gateway
            .call_ai("Say hi", ProviderKind::Anthropic, None, Some(&mut on_chunk))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "Hello", "Hello!"]);
        assert_eq!(seen.last().unwrap(), &reply.text);
        assert_eq!(reply.model, "mock-default");

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.max_tokens, 256);

        let usage = gateway.usage().get_usage("anthropic", "mock-default").unwrap();
        assert_eq!(usage.request_count, 1);
        assert_eq!(usage.total_tokens(), 5);
    }

    #[tokio::test]
    async fn test_non_streaming_provider_calls_back_once() {
        let mut provider = MockProvider::replying(vec!["Hi", " there"]);
        provider.streaming = false;
        let (gateway, _) = build(provider);
        let mut seen = Vec::new();
        let mut on_chunk = |text: &str| seen.push(text.to_string());

        let reply = gateway
            .call_ai("Say hi", ProviderKind::Anthropic, Some("claude-x"), Some(&mut on_chunk))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hi there"]);
        assert_eq!(reply.text, "Hi there");
        assert_eq!(reply.model, "claude-x");
    }

    #[tokio::test]
    async fn test_without_callback_uses_batch_call() {
        let (gateway, _) = build(MockProvider::replying(vec!["ok"]));
        let reply = gateway
            .call_ai("Say hi", ProviderKind::Anthropic, None, None)
            .await
            .unwrap();
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_blank_prompt_never_reaches_provider() {
        let (gateway, provider) = build(MockProvider::replying(vec!["ok"]));
        let err = gateway
            .call_ai("   ", ProviderKind::Anthropic, None, None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AiErrorCode::ValidationFailed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_model_name_is_validation_error() {
        let (gateway, provider) = build(MockProvider::replying(vec!["ok"]));
        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, Some("gpt 4; drop"), None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AiErrorCode::ValidationFailed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_auth_failed() {
        let (gateway, _) = build(MockProvider::replying(vec!["ok"]));
        let err = gateway
            .call_ai("hi", ProviderKind::Groq, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthFailed);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let (gateway, _) = build(MockProvider::replying(vec!["  ", "\n"]));
        let mut calls = 0;
        let mut on_chunk = |_: &str| calls += 1;

        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, None, Some(&mut on_chunk))
            .await
            .unwrap_err();

        assert_eq!(calls, 2);
        assert_eq!(err.code, AiErrorCode::ServiceUnavailable);
        assert!(err.retryable);
        assert!(gateway.usage().get_usage("anthropic", "mock-default").is_none());
    }

    #[tokio::test]
    async fn test_upstream_errors_are_classified() {
        let (gateway, _) = build(MockProvider::failing(401));
        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, AiErrorCode::AuthFailed);

        let (gateway, _) = build(MockProvider::failing(402));
        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, AiErrorCode::CreditsExhausted);
    }

    #[tokio::test]
    async fn test_failed_provider_is_not_retried() {
        let (gateway, provider) = build(MockProvider::failing(503));
        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, None, None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AiErrorCode::ServiceUnavailable);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_service_unavailable() {
        let mut provider = MockProvider::replying(vec!["late"]);
        provider.delay = Some(Duration::from_secs(120));
        let (gateway, _) = build(provider);
        let gateway = gateway.with_timeout(Duration::from_secs(30));

        let err = gateway
            .call_ai("hi", ProviderKind::Anthropic, None, None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AiErrorCode::ServiceUnavailable);
        assert!(err.message.contains("30s"));
    }
}
