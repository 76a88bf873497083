//! Runtime error types

use tether_config::ConfigError;
use tether_ipc::{ApiId, IpcError};
use thiserror::Error;

/// Control plane errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to launch runtime process: {0}")]
    LaunchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    IpcError(#[from] IpcError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Control plane already started")]
    AlreadyStarted,

    #[error("Task join error: {0}")]
    JoinError(String),
}

impl From<ConfigError> for RuntimeError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RuntimeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::JoinError(err.to_string())
    }
}

/// Request registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A request with this id is still pending
    #[error("Request {0} is already pending")]
    Duplicate(ApiId),
}
