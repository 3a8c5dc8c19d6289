//! Application configuration
//!
//! Values come from the environment (after loading `.env`) and can be
//! overridden on the command line.

use ecoquest_sync::SyncConfig;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_LOG_FILTER: &str = "ecoquest=info,ecoquest_sync=info";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid API URL {0}: expected an http:// or https:// URL")]
    InvalidUrl(String),

    #[error("Invalid sync configuration: {0}")]
    Sync(String),
}

/// Runtime configuration of the client
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the EcoQuest API, without trailing slash
    pub api_url: String,

    /// Bearer token of the signed-in user
    pub api_token: Option<String>,

    /// Per-request timeout
    pub timeout: Duration,

    /// `tracing` filter for the binary, from `RUST_LOG` when set
    pub log_filter: String,

    /// Cache and retry defaults
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout: Duration::from_secs(15),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ECOQUEST_API_URL").filter(|v| !v.trim().is_empty()) {
            config.api_url = url;
        }
        config.api_token = lookup("ECOQUEST_API_TOKEN").filter(|v| !v.trim().is_empty());
        if let Some(raw) = lookup("ECOQUEST_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: "ECOQUEST_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(filter) = lookup("RUST_LOG").filter(|v| !v.trim().is_empty()) {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Check the configuration and normalise the API URL
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let trimmed = self.api_url.trim().trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }
        self.api_url = trimmed;

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "ECOQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        self.sync.validate().map_err(ConfigError::Sync)
    }
}
