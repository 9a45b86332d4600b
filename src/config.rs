// Import configuration. Defaults first, then environment variables,
// then command-line flags (applied by `cli`).

use crate::batch::BatchSize;
use crate::retry::DEFAULT_MAX_RETRIES;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://last.leadgenius.app";
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

pub const ENV_BASE_URL: &str = "LGP_BASE_URL";
pub const ENV_BATCH_SIZE: &str = "LGP_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "LGP_MAX_RETRIES";
pub const ENV_BATCH_DELAY_MS: &str = "LGP_BATCH_DELAY_MS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "LGP_HTTP_TIMEOUT_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("max retries must be at least 1")]
    ZeroRetries,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Records per create call.
    pub batch_size: BatchSize,
    /// Attempts per request, the first one included.
    pub max_retries: u32,
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Pause between consecutive batch calls. Unrelated to retry backoff.
    pub batch_delay: Duration,
    /// Per-request timeout; `None` leaves reqwest's default in place.
    pub http_timeout: Option<Duration>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            batch_size: BatchSize::DEFAULT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_delay: DEFAULT_BATCH_DELAY,
            http_timeout: None,
        }
    }
}

fn parse_number(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value,
        reason: "expected a whole number".into(),
    })
}

impl ImportConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with the variable source injected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ImportConfig::default();

        if let Some(url) = lookup(ENV_BASE_URL) {
            config = config.with_base_url(&url);
        }
        if let Some(value) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = value.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_BATCH_SIZE,
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            let n = parse_number(ENV_MAX_RETRIES, value.clone())?;
            config.max_retries = u32::try_from(n).map_err(|_| ConfigError::Invalid {
                key: ENV_MAX_RETRIES,
                value,
                reason: "too large".into(),
            })?;
        }
        if let Some(value) = lookup(ENV_BATCH_DELAY_MS) {
            config.batch_delay = Duration::from_millis(parse_number(ENV_BATCH_DELAY_MS, value)?);
        }
        if let Some(value) = lookup(ENV_HTTP_TIMEOUT_SECS) {
            let secs = parse_number(ENV_HTTP_TIMEOUT_SECS, value)?;
            config.http_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid {
                key: ENV_BASE_URL,
                value: String::new(),
                reason: "base URL cannot be empty".into(),
            });
        }
        Ok(())
    }
}
