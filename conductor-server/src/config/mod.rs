pub mod loader;
pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use conductor_core::{ConductorConfig, RedisSourceConfig};
use serde::{Deserialize, Serialize};

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};

/// Default `RUST_LOG`-style filter when neither the environment nor the
/// config file provide one.
pub const DEFAULT_LOG_FILTER: &str = "info,conductor::worker=info,conductor::source=info";

/// Fully resolved server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log every dispatched notification through a leading logging stage.
    pub log_notifications: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
    pub conductor: ConductorConfig,
    pub source: SourceConfig,
    /// HTTP forwarding stages, registered in the order listed.
    #[serde(rename = "stage", skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<HttpStageConfig>,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

/// Where the loaded configuration came from.
#[derive(Clone, Debug, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

/// Transport the conductor consumes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// `BLPOP` on a Redis list named after the queue id.
    Redis(RedisSourceConfig),
    /// Newline-delimited JSON notifications on standard input.
    Stdin,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Redis(RedisSourceConfig::default())
    }
}

/// A stage that POSTs each notification to an HTTP endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpStageConfig {
    pub name: String,
    pub url: String,
    /// Disabled stages are not registered at all.
    #[serde(default = "HttpStageConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "HttpStageConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpStageConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
