//! Runtime process supervision configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::validation::{Validatable, validate_required_string};
use crate::error::ConfigResult;

/// Runtime process supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Path to the runtime executable; the control plane refuses to start without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    /// Shared identity string passed as the runtime's sole argument
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Minimum uptime before an immediate restart is allowed
    #[serde(with = "humantime_serde", default = "default_restart_backoff")]
    pub restart_backoff: Duration,

    /// Time between SIGTERM and kill when stopping the runtime
    #[serde(with = "humantime_serde", default = "default_terminate_grace")]
    pub terminate_grace: Duration,

    /// Whether to talk to the runtime over its stdin/stdout
    #[serde(default = "crate::domains::utils::default_true")]
    pub stdio_transport: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: None,
            identity: default_identity(),
            restart_backoff: default_restart_backoff(),
            terminate_grace: default_terminate_grace(),
            stdio_transport: true,
        }
    }
}

impl Validatable for SupervisorConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.identity, "identity", self.domain_name())?;

        if let Some(ref executable) = self.executable {
            if executable.as_os_str().is_empty() {
                return Err(self.validation_error("executable cannot be an empty path"));
            }
        }

        if self.restart_backoff.is_zero() {
            return Err(self.validation_error("restart_backoff must be greater than 0"));
        }
        if self.terminate_grace.is_zero() {
            return Err(self.validation_error("terminate_grace must be greater than 0"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "supervisor"
    }
}

fn default_identity() -> String {
    "tether-runtime-shm".to_string()
}

fn default_restart_backoff() -> Duration {
    Duration::from_secs(8)
}

fn default_terminate_grace() -> Duration {
    Duration::from_secs(5)
}
