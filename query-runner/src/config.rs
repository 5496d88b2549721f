use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.hetzner.cloud/v1";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("API token cannot be empty")]
    EmptyToken,

    #[error("HTTP timeout cannot be 0")]
    InvalidTimeout,

    #[error("Buffer period cannot be 0")]
    InvalidBufferPeriod,

    #[error("Max concurrent requests cannot be 0")]
    InvalidConcurrency,
}

/// Datasource configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Hetzner Cloud API connection
    pub api: ApiConfig,
    /// Request buffering and fan-out
    #[serde(default)]
    pub query_runner: QueryRunnerConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.api.validate()?;
        self.query_runner.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the API, including the version path. Defaults to
    /// [`DEFAULT_API_URL`].
    #[serde(default)]
    pub url: Option<Url>,
    pub token: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Log every API response body
    #[serde(default)]
    pub debug: bool,
}

impl ApiConfig {
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        match &self.url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(DEFAULT_API_URL),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.token.trim().is_empty() {
            return Err(ValidationError::EmptyToken);
        }
        if self.http_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct QueryRunnerConfig {
    /// How long incoming requests are buffered before being sent upstream
    #[serde(default = "default_buffer_period_ms")]
    pub buffer_period_ms: u64,
    /// Upper bound on simultaneous upstream calls per dispatch round
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl QueryRunnerConfig {
    pub fn buffer_period(&self) -> Duration {
        Duration::from_millis(self.buffer_period_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.buffer_period_ms == 0 {
            return Err(ValidationError::InvalidBufferPeriod);
        }
        if self.max_concurrent_requests == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        Ok(())
    }
}

impl Default for QueryRunnerConfig {
    fn default() -> Self {
        QueryRunnerConfig {
            buffer_period_ms: default_buffer_period_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_buffer_period_ms() -> u64 {
    200
}

fn default_max_concurrent_requests() -> usize {
    10
}
