//! Reconnect backoff policy

use std::time::Duration;

/// Outcome of recording a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Try again after the delay
    Retry(Duration),
    Exhausted,
}

/// Exponential backoff with a ceiling and an attempt budget
///
/// The delay for attempt `n` is `min(base * 2^n, cap)`. A failure with
/// `max_attempts` reconnects already spent exhausts the policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Consecutive failures recorded since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Record a failed attempt. Retries are granted until `max_attempts`
    /// reconnects have been scheduled since the last reset.
    pub fn record_failure(&mut self) -> Backoff {
        if self.attempt >= self.max_attempts {
            return Backoff::Exhausted;
        }

        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        Backoff::Retry(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
