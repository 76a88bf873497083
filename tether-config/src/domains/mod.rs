//! Domain-specific configuration modules

pub mod logging;
pub mod registry;
pub mod supervisor;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Tether configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TetherConfig {
    /// Runtime process supervision
    #[serde(default)]
    pub supervisor: supervisor::SupervisorConfig,

    /// Request registry and sweep cadence
    #[serde(default)]
    pub registry: registry::RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl TetherConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.supervisor.validate()?;
        self.registry.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = TetherConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
