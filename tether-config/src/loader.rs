//! Configuration loading and environment variable handling

use crate::domains::TetherConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TETHER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TetherConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: TetherConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<TetherConfig> {
        let mut config = TetherConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TetherConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut TetherConfig) -> ConfigResult<()> {
        self.apply_supervisor_overrides(&mut config.supervisor)?;
        self.apply_registry_overrides(&mut config.registry)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply supervisor config overrides
    fn apply_supervisor_overrides(
        &self,
        config: &mut crate::domains::supervisor::SupervisorConfig,
    ) -> ConfigResult<()> {
        if let Ok(executable) = self.get_env_var("RUNTIME_EXECUTABLE") {
            config.executable = Some(PathBuf::from(executable));
        }

        if let Ok(identity) = self.get_env_var("RUNTIME_IDENTITY") {
            config.identity = identity;
        }

        if let Ok(backoff) = self.get_env_var("RESTART_BACKOFF_SECONDS") {
            let seconds: u64 = backoff.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid RESTART_BACKOFF_SECONDS: {}", e))
            })?;
            config.restart_backoff = std::time::Duration::from_secs(seconds);
        }

        Ok(())
    }

    /// Apply registry config overrides
    fn apply_registry_overrides(
        &self,
        config: &mut crate::domains::registry::RegistryConfig,
    ) -> ConfigResult<()> {
        if let Ok(ticks) = self.get_env_var("TIMEOUT_TICKS") {
            config.timeout_ticks = ticks
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid TIMEOUT_TICKS: {}", e)))?;
        }

        if let Ok(every) = self.get_env_var("RETRY_EVERY") {
            config.retry_every = every
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid RETRY_EVERY: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
