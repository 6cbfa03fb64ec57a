//! Shared exponential retry/rate-limit policy (spec §4.8).
//!
//! One tunable policy (initial interval, max interval, fixed growth
//! factor) is shared by the work queue's per-item backoff and the
//! operation dispatcher's per-key backoff, so `--retry-interval-start`
//! / `--retry-interval-max` tune both surfaces identically.

use std::time::Duration;

const BACKOFF_FACTOR: f64 = 2.0;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Backoff window for the given zero-based attempt count.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_FACTOR.powi(attempt as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        // Saturates at max rather than overflowing.
        assert_eq!(policy.backoff_for(20), Duration::from_secs(2));
    }
}
