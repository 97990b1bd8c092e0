//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Decides whether and when a failed operation is retried.
///
/// The delay for attempt `n` (zero-based) is
/// `initial_delay * exponential_base^n`, capped at `max_delay`, with a
/// random spread of ±`jitter_factor` applied to the capped value so that
/// concurrent retries do not stampede.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the operation is terminal.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound on any computed delay.
    pub max_delay: Duration,

    /// Multiplier applied per attempt.
    pub exponential_base: f64,

    /// Fraction of the delay used as the jitter spread (0.0 disables jitter).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Returns true if another attempt is allowed after `attempts_made`.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Computes the backoff delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter_factor > 0.0 && capped > 0.0 {
            let spread = capped * self.jitter_factor;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            ..policy
        }
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = no_jitter(RetryPolicy::default());
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = no_jitter(RetryPolicy {
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        });
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1).as_millis() as f64;
            assert!((100.0..=300.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn allows_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn none_policy_never_retries() {
        let policy = RetryPolicy::none();
        assert!(policy.allows_retry(0));
        assert!(!policy.allows_retry(1));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }
}
