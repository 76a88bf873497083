//! Domain-driven configuration management for Tether
//!
//! Configuration is split into the supervisor, registry and logging domains,
//! each with validation, defaults, and environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    logging::LoggingConfig, registry::RegistryConfig, supervisor::SupervisorConfig, TetherConfig,
};
