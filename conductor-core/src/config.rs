use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notification::NotificationKind;

/// Queue the conductor listens on unless configured otherwise.
pub const DEFAULT_QUEUE_ID: &str = "SERIES.Conductor";

/// Knobs that tune the conductor's worker loop.
///
/// All fields carry defaults so a deployment only has to spell out what it
/// changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Queue identifier passed to the message source on every receive.
    pub queue_id: String,
    /// Notification kinds that reach the reaction stages. Everything else is
    /// discarded after decoding.
    pub handled_kinds: Vec<NotificationKind>,
    /// Consecutive empty receives between two "source unavailable" log lines.
    pub empty_receive_log_interval: u64,
    /// Pause after an empty receive before retrying (milliseconds). Zero
    /// retries immediately after yielding to the runtime.
    pub idle_backoff_ms: u64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            queue_id: DEFAULT_QUEUE_ID.to_string(),
            handled_kinds: NotificationKind::DEFAULT_HANDLED.to_vec(),
            empty_receive_log_interval: 1_000,
            idle_backoff_ms: 0,
        }
    }
}

impl ConductorConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn handles(&self, kind: NotificationKind) -> bool {
        self.handled_kinds.contains(&kind)
    }
}

/// Connection settings for the Redis list source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSourceConfig {
    pub url: String,
    /// Prepended to the queue id to form the list key.
    pub key_prefix: String,
    /// Server-side `BLPOP` timeout (milliseconds). Idle timeouts are retried
    /// inside the source and never surface as empty receives.
    pub block_timeout_ms: u64,
    /// Pause after a connection failure before reporting an empty receive.
    pub reconnect_backoff_ms: u64,
    /// Retries the connection manager makes before a connect attempt fails.
    pub connect_retries: usize,
}

impl Default for RedisSourceConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            block_timeout_ms: 250,
            reconnect_backoff_ms: 10,
            connect_retries: 6,
        }
    }
}

impl RedisSourceConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms.max(1))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn key_for(&self, queue_id: &str) -> String {
        format!("{}{}", self.key_prefix, queue_id)
    }
}
