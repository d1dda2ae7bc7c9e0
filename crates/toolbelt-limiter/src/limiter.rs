//! Fixed-window rate limiter.

use std::sync::Arc;
use toolbelt_core::config::RateLimitSettings;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{CounterStore, MemoryStore, StoreError, WindowRecord};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Limit for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Create a limit.
    #[must_use]
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// Looser limit for ordinary API routes: 100 per minute.
    #[must_use]
    pub const fn general() -> Self {
        Self::new(100, 60_000)
    }

    /// Stricter limit for AI routes: 10 per minute.
    #[must_use]
    pub const fn ai() -> Self {
        Self::new(10, 60_000)
    }

    /// `max_requests` per 24 hours.
    #[must_use]
    pub const fn daily(max_requests: u32) -> Self {
        Self::new(max_requests, DAY_MS)
    }
}

impl From<RateLimitSettings> for RateLimitConfig {
    fn from(settings: RateLimitSettings) -> Self {
        Self::new(settings.max_requests, settings.window_ms)
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Configured maximum for the window.
    pub limit: u32,
    /// Requests left in the window.
    pub remaining: u32,
    /// When the window resets, epoch milliseconds.
    pub reset_at_ms: u64,
}

impl RateLimitResult {
    const fn allowed(limit: u32, remaining: u32, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at_ms,
        }
    }

    const fn denied(limit: u32, reset_at_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
        }
    }

    /// Whole seconds until the window resets, at least 1.
    #[must_use]
    pub const fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let wait = self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000);
        if wait == 0 { 1 } else { wait }
    }
}

/// Fixed-window limiter.
///
/// Checks run against the primary store when one is configured. A primary
/// store error is logged and the same check is repeated on the in-process
/// store, so callers never observe a failure.
pub struct FixedWindowLimiter {
    primary: Option<Arc<dyn CounterStore>>,
    local: MemoryStore,
    clock: Arc<dyn Clock>,
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FixedWindowLimiter {
    /// In-process limiter on `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            primary: None,
            local: MemoryStore::new(clock.clone()),
            clock,
        }
    }

    /// Use a shared store first, falling back to the in-process one.
    #[must_use]
    pub fn with_primary(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.primary = Some(store);
        self
    }

    /// Name of the store consulted first.
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.primary
            .as_ref()
            .map_or_else(|| self.local.name(), |p| p.name())
    }

    /// Current time on the limiter's clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Decide whether `identifier` may make another request under `config`.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult {
        if let Some(primary) = &self.primary {
            match self.check_on(primary.as_ref(), identifier, config).await {
                Ok(result) => return result,
                Err(e) => warn!(
                    store = primary.name(),
                    error = %e,
                    "Counter store unavailable, limiting in-process"
                ),
            }
        }

        self.check_local(identifier, config)
    }

    /// Purge expired windows from the in-process store.
    pub fn sweep(&self) -> usize {
        let removed = self.local.purge_expired();
        if removed > 0 {
            debug!(removed, remaining = self.local.len(), "Swept expired rate-limit windows");
        }
        removed
    }

    fn check_local(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let limit = config.max_requests;
        let max = u64::from(limit);
        let (record, admitted) = self.local.hit(key, max, config.window_ms);
        let reset_at_ms = record.window_start_ms.saturating_add(config.window_ms);

        if admitted {
            RateLimitResult::allowed(
                limit,
                u32::try_from(max - record.count).unwrap_or(0),
                reset_at_ms,
            )
        } else {
            RateLimitResult::denied(limit, reset_at_ms)
        }
    }

    async fn check_on(
        &self,
        store: &dyn CounterStore,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_ms();
        let limit = config.max_requests;
        let max = u64::from(limit);

        if max == 0 {
            return Ok(RateLimitResult::denied(
                limit,
                now.saturating_add(config.window_ms),
            ));
        }

        let live = store
            .get(key)
            .await?
            .filter(|r| now < r.window_start_ms.saturating_add(config.window_ms));

        let Some(record) = live else {
            return self.start_window(store, key, config, now).await;
        };

        let reset_at_ms = record.window_start_ms.saturating_add(config.window_ms);
        if record.count >= max {
            return Ok(RateLimitResult::denied(limit, reset_at_ms));
        }

        match store.increment(key).await? {
            Some(count) if count <= max => Ok(RateLimitResult::allowed(
                limit,
                u32::try_from(max - count).unwrap_or(0),
                reset_at_ms,
            )),
            // Another request took the last slot between our read and increment
            Some(_) => Ok(RateLimitResult::denied(limit, reset_at_ms)),
            None => self.start_window(store, key, config, now).await,
        }
    }

    async fn start_window(
        &self,
        store: &dyn CounterStore,
        key: &str,
        config: &RateLimitConfig,
        now: u64,
    ) -> Result<RateLimitResult, StoreError> {
        store
            .set_with_expiry(
                key,
                WindowRecord {
                    count: 1,
                    window_start_ms: now,
                },
                config.window_ms,
            )
            .await?;

        Ok(RateLimitResult::allowed(
            config.max_requests,
            config.max_requests - 1,
            now.saturating_add(config.window_ms),
        ))
    }
}
