//! Configuration loading and validation.
//!
//! Config location: `~/.toolbelt/toolbelt.json` (JSON5).
//! Credentials are expected from the environment; see
//! [`Config::with_env_overrides`]. They are never written back to disk.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::secrets::ApiKey;
use crate::validation::limits::MAX_CONFIG_FILE_SIZE;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Rate limits per endpoint class.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Shared remote counter store (optional).
    #[serde(default)]
    pub counter_store: Option<CounterStoreConfig>,

    /// Provider configurations.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Access tokens for the AI endpoints.
    #[serde(default)]
    pub access: AccessConfig,

    /// Payment webhook settings.
    #[serde(default)]
    pub webhooks: WebhookConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, is too large, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Validation(format!(
                "Config file exceeds {MAX_CONFIG_FILE_SIZE} bytes"
            )));
        }
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// Secrets are skipped during serialization.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("toolbelt.json")
    }

    /// Get the Toolbelt state directory.
    ///
    /// Uses `TOOLBELT_STATE_DIR` env var if set, otherwise `~/.toolbelt`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TOOLBELT_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".toolbelt")
        } else {
            PathBuf::from(".toolbelt")
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 {
            return Err(ConfigError::Validation(
                "Gateway port cannot be 0".to_string(),
            ));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Gateway timeout cannot be 0".to_string(),
            ));
        }

        for (class, limit) in [("general", &self.limits.general), ("ai", &self.limits.ai)] {
            if limit.max_requests == 0 || limit.window_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Rate limit '{class}' needs maxRequests > 0 and windowMs > 0"
                )));
            }
        }

        if self.limits.daily_credits == Some(0) {
            return Err(ConfigError::Validation(
                "dailyCredits must be greater than 0 when set".to_string(),
            ));
        }

        if let Some(store) = &self.counter_store {
            if store.url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Counter store URL cannot be empty".to_string(),
                ));
            }
            if store.token.as_ref().is_none_or(ApiKey::is_blank) {
                return Err(ConfigError::Validation(
                    "Counter store requires an access token".to_string(),
                ));
            }
        }

        if self.providers.max_output_tokens == 0 {
            return Err(ConfigError::Validation(
                "providers.maxOutputTokens must be greater than 0".to_string(),
            ));
        }

        if self.providers.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "providers.timeoutSecs must be greater than 0".to_string(),
            ));
        }

        // The request timeout must outlast the provider call it wraps
        if self.gateway.timeout_secs <= self.providers.timeout_secs {
            return Err(ConfigError::Validation(format!(
                "gateway.timeoutSecs ({}) must be greater than providers.timeoutSecs ({})",
                self.gateway.timeout_secs, self.providers.timeout_secs
            )));
        }

        Ok(())
    }

    /// Apply overrides from process environment variables.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Recognized variables:
    /// `ANTHROPIC_API_KEY`, `GROQ_API_KEY`, `GEMINI_API_KEY` (or `GOOGLE_API_KEY`),
    /// `OPENROUTER_API_KEY`, `UPSTASH_REDIS_REST_URL`, `UPSTASH_REDIS_REST_TOKEN`,
    /// `STRIPE_WEBHOOK_SECRET`, `TOOLBELT_APP_URL`, `TOOLBELT_PORT`,
    /// `TOOLBELT_ACCESS_TOKENS` (comma separated).
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = Some(ApiKey::new(key));
        }
        if let Some(key) = var("GROQ_API_KEY") {
            self.providers.groq.api_key = Some(ApiKey::new(key));
        }
        if let Some(key) = var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")) {
            self.providers.gemini.api_key = Some(ApiKey::new(key));
        }
        if let Some(key) = var("OPENROUTER_API_KEY") {
            self.providers.openrouter.api_key = Some(ApiKey::new(key));
        }

        // Both halves are needed; a lone URL or token leaves limiting in-process
        if let (Some(url), Some(token)) = (
            var("UPSTASH_REDIS_REST_URL"),
            var("UPSTASH_REDIS_REST_TOKEN"),
        ) {
            let mut store = self.counter_store.take().unwrap_or_default();
            store.url = url;
            store.token = Some(ApiKey::new(token));
            self.counter_store = Some(store);
        }

        if let Some(secret) = var("STRIPE_WEBHOOK_SECRET") {
            self.webhooks.signing_secret = Some(ApiKey::new(secret));
        }

        if let Some(url) = var("TOOLBELT_APP_URL") {
            self.gateway.base_url = Some(url);
        }

        if let Some(port) = var("TOOLBELT_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid TOOLBELT_PORT value: {}", port),
            }
        }

        if let Some(tokens) = var("TOOLBELT_ACCESS_TOKENS") {
            self.access.tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ApiKey::from)
                .collect();
        }

        self
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address mode.
    #[serde(default)]
    pub mode: BindMode,

    /// Enable CORS.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Overall HTTP request timeout in seconds (non-streaming responses).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Public application base URL, used for upstream attribution headers.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: BindMode::default(),
            cors: true,
            timeout_secs: default_timeout(),
            base_url: None,
        }
    }
}

impl GatewayConfig {
    /// Resolve the bind address for the configured mode.
    #[must_use]
    pub fn bind_address(&self) -> String {
        match &self.mode {
            BindMode::Local => "127.0.0.1".to_string(),
            BindMode::Public => "0.0.0.0".to_string(),
            BindMode::Custom(addr) => addr.clone(),
        }
    }
}

const fn default_port() -> u16 {
    8787
}

const fn default_timeout() -> u64 {
    120
}

const fn default_true() -> bool {
    true
}

/// Gateway bind mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to localhost only.
    #[default]
    Local,
    /// Bind to all interfaces.
    Public,
    /// Custom bind address.
    Custom(String),
}

/// Fixed-window limit for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// Rate limits per endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Limit applied to every `/api` route.
    #[serde(default = "default_general_limit")]
    pub general: RateLimitSettings,

    /// Stricter limit for AI completion routes.
    #[serde(default = "default_ai_limit")]
    pub ai: RateLimitSettings,

    /// Per-caller daily AI request quota; unlimited when unset.
    #[serde(default)]
    pub daily_credits: Option<u32>,

    /// How often expired in-process counters are purged, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            general: default_general_limit(),
            ai: default_ai_limit(),
            daily_credits: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

const fn default_general_limit() -> RateLimitSettings {
    RateLimitSettings {
        max_requests: 100,
        window_ms: 60_000,
    }
}

const fn default_ai_limit() -> RateLimitSettings {
    RateLimitSettings {
        max_requests: 10,
        window_ms: 60_000,
    }
}

const fn default_sweep_interval() -> u64 {
    60
}

/// Remote counter store (Redis-compatible REST endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterStoreConfig {
    /// REST endpoint URL.
    pub url: String,

    /// Bearer token (prefer `UPSTASH_REDIS_REST_TOKEN`).
    #[serde(default, skip_serializing)]
    pub token: Option<ApiKey>,

    /// Prefix for every counter key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-operation timeout in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout(),
        }
    }
}

fn default_key_prefix() -> String {
    "toolbelt:ratelimit".to_string()
}

const fn default_store_timeout() -> u64 {
    1000
}

/// Provider configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    /// Anthropic configuration.
    #[serde(default)]
    pub anthropic: ProviderConfig,

    /// Groq configuration.
    #[serde(default)]
    pub groq: ProviderConfig,

    /// Google Gemini configuration.
    #[serde(default)]
    pub gemini: ProviderConfig,

    /// `OpenRouter` configuration.
    #[serde(default)]
    pub openrouter: ProviderConfig,

    /// Upper bound on generated tokens per request.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Upstream call timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            anthropic: ProviderConfig::default(),
            groq: ProviderConfig::default(),
            gemini: ProviderConfig::default(),
            openrouter: ProviderConfig::default(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl ProvidersConfig {
    /// Look up a provider section by its lowercase name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "groq" => Some(&self.groq),
            "gemini" => Some(&self.gemini),
            "openrouter" => Some(&self.openrouter),
            _ => None,
        }
    }
}

const fn default_max_output_tokens() -> u32 {
    1024
}

const fn default_provider_timeout() -> u64 {
    30
}

/// Single provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// API key (prefer the provider's environment variable).
    #[serde(default, skip_serializing)]
    pub api_key: Option<ApiKey>,

    /// Base URL override.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Default model override.
    #[serde(default)]
    pub model: Option<String>,
}

impl ProviderConfig {
    /// The credential, if one is present and not blank.
    #[must_use]
    pub fn credential(&self) -> Option<&ApiKey> {
        self.api_key.as_ref().filter(|k| !k.is_blank())
    }
}

/// Access tokens for the AI endpoints.
///
/// When no tokens are configured the endpoints are open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Accepted bearer tokens (prefer `TOOLBELT_ACCESS_TOKENS`).
    #[serde(default, skip_serializing)]
    pub tokens: Vec<ApiKey>,
}

/// Payment webhook settings. Held for the billing handlers; unused by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Signing secret for payment-provider callbacks.
    #[serde(default, skip_serializing)]
    pub signing_secret: Option<ApiKey>,
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}
