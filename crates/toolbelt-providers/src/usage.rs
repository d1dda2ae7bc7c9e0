//! Usage tracking for providers.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use toolbelt_core::types::TokenUsage;

/// Usage tracker for monitoring token consumption per provider and model.
pub struct UsageTracker {
    totals: RwLock<HashMap<(String, String), ModelUsage>>,
}

/// Usage counters for one provider/model pair.
#[derive(Debug, Default)]
pub struct ModelUsage {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    request_count: AtomicU64,
}

impl ModelUsage {
    fn add(&self, usage: &TokenUsage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> TokenUsageSummary {
        TokenUsageSummary {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
        }
    }
}

impl UsageTracker {
    /// Create a new usage tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            totals: RwLock::new(HashMap::new()),
        }
    }

    /// Record one completed request.
    pub fn record(&self, provider: &str, model: &str, usage: &TokenUsage) {
        let key = (provider.to_string(), model.to_string());

        // Fast path: existing entry only needs a read lock
        {
            let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = totals.get(&key) {
                entry.add(usage);
                return;
            }
        }

        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        totals.entry(key).or_default().add(usage);
    }

    /// Usage for one provider/model pair.
    #[must_use]
    pub fn get_usage(&self, provider: &str, model: &str) -> Option<TokenUsageSummary> {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        totals
            .get(&(provider.to_string(), model.to_string()))
            .map(ModelUsage::summary)
    }

    /// Usage summed over every model of each provider.
    #[must_use]
    pub fn by_provider(&self) -> HashMap<String, TokenUsageSummary> {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: HashMap<String, TokenUsageSummary> = HashMap::new();

        for ((provider, _), usage) in totals.iter() {
            result.entry(provider.clone()).or_default().merge(&usage.summary());
        }

        result
    }

    /// Get total usage across all providers.
    #[must_use]
    pub fn total_usage(&self) -> TokenUsageSummary {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = TokenUsageSummary::default();

        for usage in totals.values() {
            summary.merge(&usage.summary());
        }

        summary
    }

    /// Reset all usage statistics.
    pub fn reset(&self) {
        self.totals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsageSummary {
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// Total request count.
    pub request_count: u64,
}

impl TokenUsageSummary {
    /// Get total tokens (input + output).
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    fn merge(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.request_count += other.request_count;
    }
}
