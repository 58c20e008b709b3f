//! Reconnect backoff

use std::time::Duration;

/// Doubling delay, capped at a maximum
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            max,
            next: initial,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        self.attempts += 1;
        delay
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
