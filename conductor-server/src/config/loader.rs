use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use url::Url;

use conductor_core::NotificationKind;

use super::{
    Config, ConfigMetadata, ConfigWarnings, SourceConfig,
    sources::EnvConfig,
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("conductor.toml"),
        PathBuf::from("config/conductor.toml"),
    ]
});

#[derive(Debug, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub load_env_file: bool,
}

impl Default for ConfigLoaderOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            env_file: None,
            load_env_file: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
    env: Option<EnvConfig>,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options, env: None }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn skip_env_file(mut self) -> Self {
        self.options.load_env_file = false;
        self
    }

    /// Use these overrides instead of reading the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = if self.options.load_env_file {
            self.load_env_file()?
        } else {
            false
        };

        let env_config = self.env.clone().unwrap_or_else(EnvConfig::gather);

        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (mut config, warnings) =
            self.compose_config(file_config, env_config, config_path.is_some())?;
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(found) => Ok(found),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<Config>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let config = read_config_file(&path)?;
        Ok((Some(config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<Config>,
        env: EnvConfig,
        config_present: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if !config_present {
            warnings.push_with_hint(
                "No conductor.toml detected; using built-in defaults and environment variables",
                "Pass --config or set CONDUCTOR_CONFIG to point at a configuration file",
            );
        }

        let mut config = file_config.unwrap_or_default();

        if let Some(queue_id) = env.queue_id {
            config.conductor.queue_id = queue_id;
        }
        if let Some(interval) = env.empty_receive_log_interval {
            config.conductor.empty_receive_log_interval = interval;
        }
        if let Some(raw) = env.idle_backoff {
            let backoff = humantime::parse_duration(raw.trim()).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    key: "CONDUCTOR_IDLE_BACKOFF",
                    value: raw.clone(),
                    source,
                }
            })?;
            config.conductor.idle_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(url) = env.redis_url {
            match &mut config.source {
                SourceConfig::Redis(redis) => redis.url = url,
                SourceConfig::Stdin => warnings.push("REDIS_URL is set but the configured source is stdin; ignoring it"),
            }
        }
        if env.log_filter.is_some() {
            config.log_filter = env.log_filter;
        }

        validate(&config, &mut warnings)?;

        Ok((config, warnings))
    }
}

fn read_config_file(path: &Path) -> Result<Config, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn validate(config: &Config, warnings: &mut ConfigWarnings) -> Result<(), ConfigLoadError> {
    if config.conductor.queue_id.trim().is_empty() {
        return Err(ConfigLoadError::EmptyQueueId);
    }

    if config.conductor.empty_receive_log_interval == 0 {
        warnings.push_with_hint(
            "conductor.empty_receive_log_interval is 0; every empty receive will be logged",
            "Use a value such as 1000 to throttle outage diagnostics",
        );
    }

    if config.conductor.handled_kinds.is_empty() {
        warnings.push("conductor.handled_kinds is empty; every notification will be discarded");
    }
    if config.conductor.handled_kinds.contains(&NotificationKind::Unknown) {
        warnings.push(
            "conductor.handled_kinds contains Unknown; notifications of unrecognised kinds will reach the stages",
        );
    }

    if let SourceConfig::Redis(redis) = &config.source {
        let parsed = Url::parse(&redis.url).map_err(|source| ConfigLoadError::InvalidRedisUrl {
            url: redis.url.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
            warnings.push(format!(
                "source.url uses scheme '{}', which Redis clients usually reject",
                parsed.scheme()
            ));
        }
    }

    let mut seen = HashSet::new();
    for stage in &config.stages {
        if stage.name.trim().is_empty() {
            return Err(ConfigLoadError::UnnamedStage {
                url: stage.url.clone(),
            });
        }
        let parsed = Url::parse(&stage.url).map_err(|source| ConfigLoadError::InvalidStageUrl {
            name: stage.name.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigLoadError::UnsupportedStageScheme {
                name: stage.name.clone(),
                scheme: parsed.scheme().to_string(),
            });
        }
        if !seen.insert(stage.name.as_str()) {
            warnings.push_with_hint(
                format!("stage '{}' is defined more than once", stage.name),
                "Later definitions replace earlier ones at the earlier position",
            );
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {key}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("conductor.queue_id must not be empty")]
    EmptyQueueId,
    #[error("invalid Redis URL '{url}'")]
    InvalidRedisUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("stage with url '{url}' has no name")]
    UnnamedStage { url: String },
    #[error("invalid URL for stage '{name}'")]
    InvalidStageUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },
    #[error("stage '{name}' uses unsupported scheme '{scheme}'")]
    UnsupportedStageScheme { name: String, scheme: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
