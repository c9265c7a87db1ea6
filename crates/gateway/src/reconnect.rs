//! Reconnect policy: bounded attempts with capped, monotonically
//! non-decreasing backoff.
//!
//! The first attempt of a sequence runs immediately; each subsequent
//! attempt waits the current delay, which then scales by the
//! configured multiplier up to the cap. `reset()` after a successful
//! connect restores the full attempt budget.

use std::time::Duration;

use ibkr_mcp_core::config::ReconnectSettings;

/// One granted attempt: its 1-based number and the delay to wait
/// before making it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct ReconnectPolicy {
    settings: ReconnectSettings,
    current_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(settings: ReconnectSettings) -> Self {
        let current_delay = settings.initial_delay();
        Self {
            settings,
            current_delay,
            attempts: 0,
        }
    }

    /// Grant the next attempt, or `None` once the budget is exhausted.
    pub fn next_attempt(&mut self) -> Option<Attempt> {
        if self.attempts >= self.settings.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = if self.attempts == 1 {
            Duration::ZERO
        } else {
            let delay = self.current_delay;
            self.current_delay = self.scaled(delay);
            delay
        };

        Some(Attempt {
            number: self.attempts,
            delay,
        })
    }

    /// Restore the full budget after a successful connect.
    pub fn reset(&mut self) {
        self.current_delay = self.settings.initial_delay();
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.settings.max_attempts
    }

    fn scaled(&self, delay: Duration) -> Duration {
        // A multiplier below 1 would shrink the delay; backoff never
        // decreases, so misconfigured values degrade to constant delay.
        let multiplier = self.settings.multiplier.max(1.0);
        let scaled = delay.as_millis() as f64 * multiplier;
        let millis = if scaled.is_finite() && scaled > 0.0 {
            scaled.round() as u64
        } else {
            0
        };
        Duration::from_millis(millis).min(self.settings.max_delay())
    }
}
