//! Retry policy for failed async deliveries.
//!
//! Exponential backoff with a fixed retry budget: the Nth retry waits
//! `base * 2^(N-1)`, and a delivery is terminally failed once the budget is
//! spent. Optional jitter spreads retries of simultaneously-failing
//! deliveries; it defaults to zero so schedules are exact.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for async webhook deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Base delay for the exponential backoff schedule.
    pub base_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to computed delays.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay: Duration::from_secs(10), jitter_factor: 0.0 }
    }
}

/// Outcome of a retry decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the delivery after the given delay.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// Budget spent; the failure is terminal.
    GiveUp,
}

impl RetryPolicy {
    /// Decides what to do after attempt number `attempt_number` (1-based,
    /// counting the initial attempt) has failed.
    ///
    /// With the default budget of 5 retries, attempts 1 through 5 schedule
    /// retries and the 6th failure is terminal.
    pub fn decide(&self, attempt_number: u32) -> RetryDecision {
        if attempt_number > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry { delay: self.delay_for_retry(attempt_number) }
    }

    /// Delay before the Nth retry (1-based): `base * 2^(N-1)`, jittered.
    pub fn delay_for_retry(&self, retry_number: u32) -> Duration {
        let exponent = retry_number.saturating_sub(1).min(20);
        let delay = self.base_delay * 2_u32.saturating_pow(exponent);
        apply_jitter(delay, self.jitter_factor)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_from_base() {
        let policy = RetryPolicy::default();

        // 10 * 2^(N-1) seconds for retries 1..=5.
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for_retry(4), Duration::from_secs(80));
        assert_eq!(policy.delay_for_retry(5), Duration::from_secs(160));
    }

    #[test]
    fn budget_exhausts_after_max_retries() {
        let policy = RetryPolicy::default();

        for attempt in 1..=5 {
            assert!(
                matches!(policy.decide(attempt), RetryDecision::Retry { .. }),
                "attempt {attempt} should schedule a retry"
            );
        }
        assert_eq!(policy.decide(6), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let delay = policy.delay_for_retry(1).as_secs_f64();
            assert!((5.0..=15.0).contains(&delay), "jittered delay out of range: {delay}");
        }
    }

    #[test]
    fn large_retry_numbers_do_not_overflow() {
        let policy = RetryPolicy { max_retries: u32::MAX, ..RetryPolicy::default() };
        // Exponent is capped; this must not panic.
        let _ = policy.delay_for_retry(10_000);
    }
}
