//! Request registry and sweep configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::validation::{Validatable, validate_positive};
use crate::error::ConfigResult;

/// Request registry configuration.
///
/// The countdown is measured in sweep ticks, so `tick_interval` is the only
/// wall-clock knob: with the defaults a request is retried at 10 s and 20 s
/// and times out at 30 s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ticks a request may stay pending before it times out
    #[serde(default = "default_timeout_ticks")]
    pub timeout_ticks: u32,

    /// Retry a pending request whenever its remaining ticks are a multiple of this
    #[serde(default = "default_retry_every")]
    pub retry_every: u32,

    /// Wall-clock length of one tick
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: default_timeout_ticks(),
            retry_every: default_retry_every(),
            tick_interval: default_tick_interval(),
        }
    }
}

impl Validatable for RegistryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.timeout_ticks, "timeout_ticks", self.domain_name())?;
        validate_positive(self.retry_every, "retry_every", self.domain_name())?;
        validate_positive(self.tick_interval.as_millis(), "tick_interval", self.domain_name())?;

        if self.retry_every > self.timeout_ticks {
            return Err(self.validation_error(format!(
                "retry_every ({}) cannot exceed timeout_ticks ({})",
                self.retry_every, self.timeout_ticks
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "registry"
    }
}

fn default_timeout_ticks() -> u32 {
    30
}

fn default_retry_every() -> u32 {
    10
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}
