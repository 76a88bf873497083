//! Outcome taxonomy attached to every callback invocation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an API call.
///
/// Handlers check the status first and only interpret the payload when it is
/// [`Status::Success`]; every other status comes with the kind's default payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The runtime answered; the payload is valid
    Success,
    /// Rejected synchronously, nothing was attempted
    Fail,
    /// No reply arrived within the countdown despite retries
    Timeout,
    /// The runtime failed to start at all; permanent until restarted
    Exception,
    /// The runtime is not currently alive; transient
    NotReady,
}

impl Status {
    /// Whether the payload accompanying this status carries data
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Fail => write!(f, "fail"),
            Status::Timeout => write!(f, "timeout"),
            Status::Exception => write!(f, "exception"),
            Status::NotReady => write!(f, "not_ready"),
        }
    }
}
