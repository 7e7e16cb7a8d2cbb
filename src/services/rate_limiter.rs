//! Sliding-window attempt limiter for login.
//!
//! Attempts are kept in memory per key and reset on restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Record an attempt for `key`; `false` when the window is already full
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();

        let entry = attempts.entry(key.to_lowercase()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max_attempts {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drop keys whose attempts have all expired
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.attempts.lock().retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < self.window);
            !entries.is_empty()
        });
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_after_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_and_record("ana@example.com"));
        assert!(limiter.check_and_record("ANA@example.com"));
        assert!(!limiter.check_and_record("ana@example.com"));
        assert!(limiter.check_and_record("bia@example.com"));
    }

    #[test]
    fn rate_limiter_window_expires() {
        let limiter = RateLimiter::new(1, Duration::ZERO);
        assert!(limiter.check_and_record("ana@example.com"));
        assert!(limiter.check_and_record("ana@example.com"));

        limiter.cleanup();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
