use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::download::DEFAULT_CONCURRENCY;

pub const CONCURRENCY_VAR: &str = "DEPSEA_CONCURRENCY";
pub const TIMEOUT_VAR: &str = "DEPSEA_HTTP_TIMEOUT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DEPSEA_CONCURRENCY must be a positive integer, got `{value}`")]
    Concurrency { value: String },

    #[error("DEPSEA_HTTP_TIMEOUT is not a valid duration: `{value}`")]
    Timeout {
        value: String,
        #[source]
        source: humantime::DurationError,
    },
}

/// Environment-driven settings for the download stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    pub concurrency: usize,
    pub timeout: Option<Duration>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
        }
    }
}

impl DownloadConfig {
    /// Build a [`DownloadConfig`] from `DEPSEA_CONCURRENCY` and
    /// `DEPSEA_HTTP_TIMEOUT` (e.g. `30s`, `2m`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(CONCURRENCY_VAR).filter(|value| !value.trim().is_empty()) {
            config.concurrency = parse_concurrency(&raw)?;
        }

        if let Some(raw) = lookup(TIMEOUT_VAR).filter(|value| !value.trim().is_empty()) {
            let timeout = humantime::parse_duration(raw.trim())
                .map_err(|source| ConfigError::Timeout { value: raw, source })?;
            config.timeout = Some(timeout);
        }

        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

pub fn parse_concurrency(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Concurrency {
            value: raw.to_string(),
        }),
    }
}
