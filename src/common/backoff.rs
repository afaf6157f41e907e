use std::time::Duration;

/// Exponential backoff with a ceiling on delay and on consecutive attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    /// Records a failure and returns the delay before retrying, or `None`
    /// once `max_attempts` consecutive failures have been recorded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self
            .initial
            .saturating_mul(2u32.saturating_pow(self.attempt - 1))
            .min(self.max);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
