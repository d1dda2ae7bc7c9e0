//! Counter storage.
//!
//! The limiter only needs three primitives: read a window, start a window
//! with a time-to-live, and atomically bump the count of a live window.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::clock::Clock;

/// Counter store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Request never completed (connect, timeout, TLS).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Store answered with a non-success status.
    #[error("Store returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// Store answered with something we could not interpret.
    #[error("Unexpected store response: {0}")]
    Decode(String),

    /// Store rejected a command.
    #[error("Store command failed: {0}")]
    Command(String),

    /// Store is misconfigured.
    #[error("Store configuration error: {0}")]
    Config(String),
}

/// One fixed window for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Requests admitted so far in this window.
    pub count: u64,
    /// When the window opened, epoch milliseconds.
    pub window_start_ms: u64,
}

/// Storage for rate-limit windows.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Store name for logs.
    fn name(&self) -> &'static str;

    /// Read the live window for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError>;

    /// Replace the window for `key`; it disappears after `ttl_ms`.
    async fn set_with_expiry(
        &self,
        key: &str,
        record: WindowRecord,
        ttl_ms: u64,
    ) -> Result<(), StoreError>;

    /// Atomically add one to a live window and return the new count.
    ///
    /// Returns `None` when the key does not exist. Never creates a key.
    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    record: WindowRecord,
    expires_at_ms: u64,
}

/// In-process counter store.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store using `clock` for expiry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.expires_at_ms > now);
        before - entries.len()
    }

    /// Number of stored windows, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no windows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count one request against `key` under a single lock.
    ///
    /// Opens a new window when none is live. Returns the window after the
    /// attempt and whether the request fit within `max`.
    pub fn hit(&self, key: &str, max: u64, window_ms: u64) -> (WindowRecord, bool) {
        let now = self.clock.now_ms();
        if max == 0 {
            return (
                WindowRecord {
                    count: 0,
                    window_start_ms: now,
                },
                false,
            );
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key).filter(|e| {
            e.expires_at_ms > now && now < e.record.window_start_ms.saturating_add(window_ms)
        }) {
            if entry.record.count >= max {
                return (entry.record, false);
            }
            entry.record.count += 1;
            return (entry.record, true);
        }

        let record = WindowRecord {
            count: 1,
            window_start_ms: now,
        };
        entries.insert(
            key.to_string(),
            Entry {
                record,
                expires_at_ms: now.saturating_add(window_ms),
            },
        );
        (record, true)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(e) if e.expires_at_ms > now => Ok(Some(e.record)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        record: WindowRecord,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let expires_at_ms = self.clock.now_ms().saturating_add(ttl_ms);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Entry {
                    record,
                    expires_at_ms,
                },
            );
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get_mut(key)
            .filter(|e| e.expires_at_ms > now)
            .map(|e| {
                e.record.count += 1;
                e.record.count
            }))
    }
}
