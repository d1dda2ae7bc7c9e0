//! Per-caller credit accounting.
//!
//! Usage quotas are product bookkeeping kept outside the gateway; the
//! gateway only asks whether a caller may spend one more request.

use async_trait::async_trait;
use std::sync::Arc;

use toolbelt_core::types::ClientKey;
use toolbelt_limiter::{FixedWindowLimiter, RateLimitConfig};

/// Answer from a credit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditDecision {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// Credits left after this request, when metered.
    pub remaining: Option<u32>,
}

/// Decides whether a caller has credit for another AI request.
#[async_trait]
pub trait CreditGate: Send + Sync {
    /// Check and, when allowed, consume one credit for `subject`.
    async fn check(&self, subject: &ClientKey) -> CreditDecision;
}

/// Admits every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unmetered;

#[async_trait]
impl CreditGate for Unmetered {
    async fn check(&self, _subject: &ClientKey) -> CreditDecision {
        CreditDecision {
            allowed: true,
            remaining: None,
        }
    }
}

/// Fixed daily allowance per caller.
pub struct DailyCredits {
    limiter: Arc<FixedWindowLimiter>,
    config: RateLimitConfig,
}

impl DailyCredits {
    /// Allow `per_day` AI requests per caller, counted on `limiter`.
    #[must_use]
    pub const fn new(limiter: Arc<FixedWindowLimiter>, per_day: u32) -> Self {
        Self {
            limiter,
            config: RateLimitConfig::daily(per_day),
        }
    }
}

#[async_trait]
impl CreditGate for DailyCredits {
    async fn check(&self, subject: &ClientKey) -> CreditDecision {
        let result = self
            .limiter
            .check_rate_limit(&subject.scoped("credits"), &self.config)
            .await;

        CreditDecision {
            allowed: result.allowed,
            remaining: Some(result.remaining),
        }
    }
}
