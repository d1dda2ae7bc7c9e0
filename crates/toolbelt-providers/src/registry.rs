//! Provider registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use toolbelt_core::config::ProvidersConfig;

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::kind::ProviderKind;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::Provider;

const ATTRIBUTION_TITLE: &str = "Toolbelt";

/// Configured providers by kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider that has a credential.
    ///
    /// `app_url` is sent as the `OpenRouter` referer.
    #[must_use]
    pub fn from_config(config: &ProvidersConfig, app_url: Option<&str>) -> Self {
        let mut registry = Self::new();

        for kind in ProviderKind::ALL {
            let Some(section) = config.get(kind.as_str()) else {
                continue;
            };
            let Some(key) = section.credential().cloned() else {
                debug!(provider = %kind, "No credential configured, skipping");
                continue;
            };

            let base_url = section.base_url.as_deref();
            let model = section
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string());

            let provider: Arc<dyn Provider> = match kind {
                ProviderKind::Anthropic => Arc::new(
                    base_url
                        .map_or_else(
                            || AnthropicProvider::new(key.clone()),
                            |url| AnthropicProvider::with_base_url(key.clone(), url),
                        )
                        .with_model(model),
                ),
                ProviderKind::Gemini => Arc::new(
                    base_url
                        .map_or_else(
                            || GeminiProvider::new(key.clone()),
                            |url| GeminiProvider::with_base_url(key.clone(), url),
                        )
                        .with_model(model),
                ),
                ProviderKind::Groq => {
                    let mut provider = OpenAiCompatProvider::groq(key).with_model(model);
                    if let Some(url) = base_url {
                        provider = provider.with_base_url(url);
                    }
                    Arc::new(provider)
                }
                ProviderKind::OpenRouter => {
                    let mut provider = OpenAiCompatProvider::openrouter(key)
                        .with_model(model)
                        .with_attribution(app_url.map(str::to_string), ATTRIBUTION_TITLE);
                    if let Some(url) = base_url {
                        provider = provider.with_base_url(url);
                    }
                    Arc::new(provider)
                }
            };

            registry.register(kind, provider);
        }

        registry
    }

    /// Add or replace a provider.
    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn Provider>) {
        debug!(provider = %kind, model = provider.default_model(), "Registered provider");
        self.providers.insert(kind, provider);
    }

    /// Look up a provider.
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Configured kinds in a stable order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    /// Configured providers with their default models.
    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &Arc<dyn Provider>)> {
        self.providers.iter().map(|(k, p)| (*k, p))
    }

    /// Number of configured providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbelt_core::ApiKey;

    #[test]
    fn test_only_credentialed_providers_are_built() {
        let mut config = ProvidersConfig::default();
        config.anthropic.api_key = Some(ApiKey::from("sk-ant"));
        config.groq.api_key = Some(ApiKey::from("   "));
        config.gemini.api_key = Some(ApiKey::from("AIza"));
        config.gemini.model = Some("gemini-1.5-pro".to_string());

        let registry = ProviderRegistry::from_config(&config, None);
        assert_eq!(
            registry.kinds(),
            vec![ProviderKind::Anthropic, ProviderKind::Gemini]
        );

        let gemini = registry.get(ProviderKind::Gemini).unwrap();
        assert_eq!(gemini.default_model(), "gemini-1.5-pro");
        assert!(registry.get(ProviderKind::Groq).is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default(), None);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
