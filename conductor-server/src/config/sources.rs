use std::path::PathBuf;

/// Configuration overrides read from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub queue_id: Option<String>,
    pub redis_url: Option<String>,
    pub idle_backoff: Option<String>,
    pub empty_receive_log_interval: Option<u64>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests do not have to touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            config_path: non_empty("CONDUCTOR_CONFIG").map(PathBuf::from),
            queue_id: non_empty("CONDUCTOR_QUEUE_ID"),
            redis_url: non_empty("REDIS_URL"),
            idle_backoff: non_empty("CONDUCTOR_IDLE_BACKOFF"),
            empty_receive_log_interval: non_empty("CONDUCTOR_EMPTY_LOG_INTERVAL")
                .and_then(|s| s.trim().parse().ok()),
            log_filter: non_empty("CONDUCTOR_LOG"),
        }
    }
}
