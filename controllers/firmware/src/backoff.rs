//! # Exponential Backoff
//!
//! Capped exponential delays for two situations:
//!
//! - reconcile errors, tracked per resource key so a flapping resource backs
//!   off without slowing down its neighbours ([`BackoffTracker`]);
//! - BMC readiness after a manager reset, where the delay follows the time
//!   already spent waiting ([`ExponentialBackoff::for_elapsed`]).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential delay between `min` and `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Backoff doubling from `min`, never exceeding `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    /// Delay before attempt number `attempt` (0-indexed): `min * 2^attempt`, capped
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
        self.min.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Delay proportional to how long we have already waited.
    ///
    /// Waiting `elapsed` so far means the next poll comes after `elapsed`
    /// again (doubling the total wait), clamped to the bounds.
    #[must_use]
    pub fn for_elapsed(&self, elapsed: Duration) -> Duration {
        elapsed.clamp(self.min, self.max)
    }
}

/// Consecutive error counts per resource key
#[derive(Debug)]
pub struct BackoffTracker {
    backoff: ExponentialBackoff,
    errors: Mutex<HashMap<String, u32>>,
}

impl BackoffTracker {
    /// Tracker handing out delays from `backoff`
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Record one more error for `key` and return the delay before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        let count = errors.entry(key.to_string()).or_insert(0);
        let delay = self.backoff.delay(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Forget the error history of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Current consecutive error count of `key`
    pub fn error_count(&self, key: &str) -> u32 {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence_is_capped() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(30));
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(2), Duration::from_secs(8));
        assert_eq!(backoff.delay(3), Duration::from_secs(16));
        assert_eq!(backoff.delay(4), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_for_elapsed_clamps() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(30));
        assert_eq!(backoff.for_elapsed(Duration::ZERO), Duration::from_secs(2));
        assert_eq!(backoff.for_elapsed(Duration::from_secs(7)), Duration::from_secs(7));
        assert_eq!(backoff.for_elapsed(Duration::from_secs(300)), Duration::from_secs(30));
    }

    #[test]
    fn test_tracker_counts_per_key_and_resets() {
        let tracker = BackoffTracker::new(ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));
        assert_eq!(tracker.next_delay("a"), Duration::from_secs(1));
        assert_eq!(tracker.next_delay("a"), Duration::from_secs(2));
        assert_eq!(tracker.next_delay("b"), Duration::from_secs(1));
        assert_eq!(tracker.error_count("a"), 2);

        tracker.reset("a");
        assert_eq!(tracker.error_count("a"), 0);
        assert_eq!(tracker.next_delay("a"), Duration::from_secs(1));
    }
}
