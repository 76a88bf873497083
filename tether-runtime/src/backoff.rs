//! Crash-loop protection for runtime restarts

use std::time::Duration;
use tokio::time::Instant;

/// Restart throttle for the supervised runtime.
///
/// A process that ran for at least `threshold` may be relaunched at once.
/// One that died sooner waits out the remainder of the threshold plus a
/// one-second margin, counted from its previous start.
#[derive(Debug, Clone)]
pub struct RestartThrottle {
    threshold: Duration,
    last_start: Option<Instant>,
}

const MARGIN: Duration = Duration::from_secs(1);

impl RestartThrottle {
    /// Create a throttle; the first launch is never delayed
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_start: None,
        }
    }

    /// Delay to apply before a launch attempted at `now`
    pub fn delay_at(&self, now: Instant) -> Option<Duration> {
        let last_start = self.last_start?;
        let elapsed = now.saturating_duration_since(last_start);

        if elapsed < self.threshold {
            Some(self.threshold - elapsed + MARGIN)
        } else {
            None
        }
    }

    /// Record a launch attempt
    pub fn record_start(&mut self, now: Instant) {
        self.last_start = Some(now);
    }
}
