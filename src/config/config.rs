//! Configuration structures and loading

use crate::auth::ConnectionIdentity;
use crate::error::{RefreshError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable names recognised by [`Config::apply_environment_overrides`]
pub struct EnvVars;

impl EnvVars {
    pub const ENV: &'static str = "CBS_REFRESH_ENV";
    pub const BUFFER_PERIOD_SECS: &'static str = "CBS_REFRESH_BUFFER_PERIOD_SECS";
    pub const INITIALIZE_TIMEOUT_SECS: &'static str = "CBS_REFRESH_INITIALIZE_TIMEOUT_SECS";
    pub const LOG_LEVEL: &'static str = "CBS_REFRESH_LOG_LEVEL";
    pub const LOG_FORMAT: &'static str = "CBS_REFRESH_LOG_FORMAT";
    pub const HOST_NAME: &'static str = "CBS_REFRESH_HOST_NAME";
    pub const DEVICE_ID: &'static str = "CBS_REFRESH_DEVICE_ID";
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Refresh scheduling
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Identity used for every negotiation
    #[serde(default)]
    pub identity: Option<ConnectionIdentity>,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Token refresh scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Safety margin before expiry, also the minimum delay between renewals
    /// and the timeout of each background renewal (default: 120)
    #[serde(default = "default_buffer_period_secs")]
    pub buffer_period_secs: u64,
    /// Budget for the first, caller-awaited negotiation (default: 60)
    #[serde(default = "default_initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,
    /// Capacity of the refresh event broadcast channel (default: 32)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_buffer_period_secs() -> u64 {
    120
}

fn default_initialize_timeout_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    32
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            buffer_period_secs: default_buffer_period_secs(),
            initialize_timeout_secs: default_initialize_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl RefreshConfig {
    /// Get buffer period as Duration
    pub fn buffer_period(&self) -> Duration {
        Duration::from_secs(self.buffer_period_secs)
    }

    /// Get initialize timeout as Duration
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_secs(self.initialize_timeout_secs)
    }

    /// Validate refresh configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer_period_secs == 0 {
            return Err(RefreshError::config("Buffer period cannot be zero"));
        }
        if self.initialize_timeout_secs == 0 {
            return Err(RefreshError::config("Initialize timeout cannot be zero"));
        }
        if self.event_channel_capacity == 0 {
            return Err(RefreshError::config("Event channel capacity cannot be zero"));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter used when RUST_LOG is unset
    pub level: String,
    /// Output format: "text" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(RefreshError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(RefreshError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        let env = std::env::var(EnvVars::ENV)
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let env_specific_file = format!(".env.{}", env);
        let env_files = [".env", env_specific_file.as_str(), ".env.local"];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }

        tracing::debug!("Environment: {}", env);
    }

    /// Load configuration from file with environment variables applied.
    ///
    /// A missing file yields the built-in defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_env_files();

        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                RefreshError::config(format!("Failed to read config file: {}", e))
            })?;
            Self::from_yaml(&content)?
        } else {
            tracing::warn!("Config file {:?} not found, using defaults", path.as_ref());
            Self::default()
        };

        config.apply_environment_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document without touching the environment
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RefreshError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        if let Some(secs) = env_u64(EnvVars::BUFFER_PERIOD_SECS)? {
            self.refresh.buffer_period_secs = secs;
        }

        if let Some(secs) = env_u64(EnvVars::INITIALIZE_TIMEOUT_SECS)? {
            self.refresh.initialize_timeout_secs = secs;
        }

        if let Ok(level) = std::env::var(EnvVars::LOG_LEVEL) {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }

        if let Ok(format) = std::env::var(EnvVars::LOG_FORMAT) {
            if !format.is_empty() {
                self.logging.format = format;
            }
        }

        let host_name = std::env::var(EnvVars::HOST_NAME).ok().filter(|s| !s.is_empty());
        let device_id = std::env::var(EnvVars::DEVICE_ID).ok().filter(|s| !s.is_empty());
        self.apply_identity_overrides(host_name, device_id);

        Ok(())
    }

    /// Override identity fields; creates an identity when both are given and none is configured
    pub fn apply_identity_overrides(&mut self, host_name: Option<String>, device_id: Option<String>) {
        if let Some(identity) = self.identity.as_mut() {
            if let Some(host_name) = host_name {
                identity.host_name = host_name;
            }
            if let Some(device_id) = device_id {
                identity.device_id = device_id;
            }
        } else if let (Some(host_name), Some(device_id)) = (host_name, device_id) {
            self.identity = Some(ConnectionIdentity::new(host_name, device_id));
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.refresh.validate()?;
        self.logging.validate()?;
        if let Some(identity) = &self.identity {
            identity.validate()?;
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .map_err(|e| RefreshError::config(format!("Invalid {} environment variable: {}", name, e))),
        _ => Ok(None),
    }
}
