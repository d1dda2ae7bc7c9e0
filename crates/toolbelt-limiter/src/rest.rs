//! Shared counter store over a Redis-compatible REST API.
//!
//! Speaks the Upstash pipeline protocol: `POST {url}/pipeline` with a JSON
//! array of commands, answered by one `{result}` or `{error}` per command.
//! Each window is a hash `{count, start}` with a `PEXPIRE` equal to the
//! window length.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use toolbelt_core::{ApiKey, truncate_on_char_boundary};
use toolbelt_core::config::CounterStoreConfig;
use tracing::debug;

use crate::store::{CounterStore, StoreError, WindowRecord};

const MAX_ERROR_BODY: usize = 200;

// Increments only when the key still exists so a window can never lose its TTL.
const INCREMENT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('HINCRBY', KEYS[1], 'count', 1)
end
return false
";

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Remote counter store.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    token: ApiKey,
    key_prefix: String,
}

impl RestStore {
    /// Create a store for `base_url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: ApiKey,
        key_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            key_prefix: key_prefix.into(),
        })
    }

    /// Create a store from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the token is missing or the client cannot be built.
    pub fn from_config(config: &CounterStoreConfig) -> Result<Self, StoreError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_blank())
            .ok_or_else(|| StoreError::Config("counter store token is missing".to_string()))?;

        Self::new(
            config.url.clone(),
            token,
            config.key_prefix.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn pipeline(&self, commands: Value) -> Result<Vec<Value>, StoreError> {
        let response = self
            .client
            .post(format!("{}/pipeline", self.base_url))
            .bearer_auth(self.token.expose())
            .json(&commands)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut message, MAX_ERROR_BODY);
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let replies: Vec<CommandReply> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        replies
            .into_iter()
            .map(|reply| match reply.error {
                Some(error) => Err(StoreError::Command(error)),
                None => Ok(reply.result.unwrap_or(Value::Null)),
            })
            .collect()
    }

    async fn single(&self, command: Value) -> Result<Value, StoreError> {
        self.pipeline(json!([command]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("empty pipeline reply".to_string()))
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CounterStore for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        let reply = self
            .single(json!(["HMGET", self.full_key(key), "count", "start"]))
            .await?;

        let fields = reply
            .as_array()
            .ok_or_else(|| StoreError::Decode(format!("HMGET returned {reply}")))?;

        match fields.as_slice() {
            [Value::Null, Value::Null] => Ok(None),
            [count, start] => {
                let count = as_u64(count)
                    .ok_or_else(|| StoreError::Decode(format!("bad count {count}")))?;
                let window_start_ms = as_u64(start)
                    .ok_or_else(|| StoreError::Decode(format!("bad start {start}")))?;
                Ok(Some(WindowRecord {
                    count,
                    window_start_ms,
                }))
            }
            _ => Err(StoreError::Decode(format!("HMGET returned {reply}"))),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        record: WindowRecord,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let key = self.full_key(key);
        debug!(key = %key, ttl_ms, "Starting remote window");

        self.pipeline(json!([
            [
                "HSET",
                key,
                "count",
                record.count.to_string(),
                "start",
                record.window_start_ms.to_string()
            ],
            ["PEXPIRE", key, ttl_ms.to_string()],
        ]))
        .await?;

        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let reply = self
            .single(json!(["EVAL", INCREMENT_SCRIPT, "1", self.full_key(key)]))
            .await?;

        match reply {
            Value::Null | Value::Bool(false) => Ok(None),
            other => as_u64(&other)
                .map(Some)
                .ok_or_else(|| StoreError::Decode(format!("EVAL returned {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_token() {
        let config = CounterStoreConfig {
            url: "https://eu1.upstash.io".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RestStore::from_config(&config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_key_prefix_and_trailing_slash() {
        let store = RestStore::new(
            "https://eu1.upstash.io/",
            ApiKey::from("t"),
            "toolbelt:ratelimit",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(store.base_url, "https://eu1.upstash.io");
        assert_eq!(store.full_key("ai:ip:1.2.3.4"), "toolbelt:ratelimit:ai:ip:1.2.3.4");
    }

    #[test]
    fn test_as_u64_accepts_strings_and_numbers() {
        assert_eq!(as_u64(&json!("42")), Some(42));
        assert_eq!(as_u64(&json!(7)), Some(7));
        assert_eq!(as_u64(&json!("x")), None);
    }
}
