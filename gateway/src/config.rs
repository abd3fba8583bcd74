use batch_proxy::config::{Config as ProxyConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;
use url::Url;

/// Overrides `proxy.api.base_url` when set.
pub const API_BASE_URL_ENV: &str = "API_BASE_URL";

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Applies the base URL override, if any, then validates the result.
    pub fn finalize(mut self, base_url_override: Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = base_url_override.filter(|v| !v.trim().is_empty()) {
            let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidEnv {
                name: API_BASE_URL_ENV,
                reason: e.to_string(),
            })?;
            self.proxy.api.base_url = Some(url);
        }

        self.proxy.validate()?;
        Ok(self)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("invalid {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}
