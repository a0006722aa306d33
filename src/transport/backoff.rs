//! Bounded exponential backoff for reconnect attempts.

use crate::defaults;
use std::time::Duration;

/// Reconnect bookkeeping: attempt counter plus the delay schedule.
///
/// Attempts 1..=5 yield delays of 2, 4, 8, 16, 30 seconds. After the
/// fifth attempt the policy gives up; only a manual reconnect (which
/// resets the counter) can revive the connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    cap: Duration,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            max_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
            cap: Duration::from_secs(defaults::RECONNECT_CAP_SECS),
        }
    }

    /// Claim the next attempt slot, returning the delay to wait before
    /// reconnecting, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let exp = Duration::from_secs(2u64.saturating_pow(self.attempt));
        Some(exp.min(self.cap))
    }

    /// Reset the counter. Only successful connection or manual
    /// disconnect call this.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}
