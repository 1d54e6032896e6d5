//! Shared count-and-double retry abstraction (Design Notes §9).
//!
//! The worker handshake, the data provisioner's fetch/host-discovery loop,
//! and anything else that needs bounded exponential backoff all go through
//! this instead of hand-rolling their own counters.

use std::time::Duration;

use tokio::time::sleep;

pub const MAX_ATTEMPTS: u32 = 17;
pub const INITIAL_DELAY_MS: u64 = 1;

/// A single backoff sequence: starts at 1ms, doubles each attempt, caps at
/// 17 attempts. One `Backoff` is used per retried operation, not shared.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    delay_ms: u64,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            max_attempts: MAX_ATTEMPTS,
            delay_ms: INITIAL_DELAY_MS,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sleeps for the current delay, then doubles it and advances the
    /// attempt counter. Call only when `attempts_exhausted()` is false.
    pub async fn wait(&mut self) {
        sleep(Duration::from_millis(self.delay_ms)).await;
        self.delay_ms = self.delay_ms.saturating_mul(2);
        self.attempt += 1;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_seventeen_attempts() {
        let mut b = Backoff::new();
        for _ in 0..MAX_ATTEMPTS {
            assert!(!b.attempts_exhausted());
            b.attempt += 1;
        }
        assert!(b.attempts_exhausted());
    }

    #[tokio::test]
    async fn delay_doubles_each_wait() {
        let mut b = Backoff::new();
        assert_eq!(b.delay_ms, 1);
        b.wait().await;
        assert_eq!(b.delay_ms, 2);
        b.wait().await;
        assert_eq!(b.delay_ms, 4);
        assert_eq!(b.attempt(), 2);
    }
}
