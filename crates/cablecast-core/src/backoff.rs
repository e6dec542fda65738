//! Reconnect backoff policy.
//!
//! Delays grow exponentially with the attempt number, are capped at
//! `max_delay`, and get up to `max_jitter` of random spread so that clients
//! dropped by the same outage do not reconnect in lockstep.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the exponential part of the delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Growth factor between consecutive attempts.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Maximum random spread added to every delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Exponential backoff with a cap and additive jitter.
///
/// # Invariants
///
/// - `base_delay` is non-decreasing in the attempt number
/// - `delay(attempt, _) <= max_delay + max_jitter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before attempt 1
    pub initial_delay: Duration,
    /// Cap on the exponential part
    pub max_delay: Duration,
    /// Growth factor (values below 1 are treated as 1)
    pub multiplier: u32,
    /// Maximum random spread
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Same policy without jitter. Useful for tests and for single clients.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Delay for a 1-based attempt number, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay for a 1-based attempt number, with jitter drawn from `entropy`.
    #[must_use]
    pub fn delay(&self, attempt: u32, entropy: u64) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = match jitter_ms {
            0 => 0,
            max => entropy % max.saturating_add(1),
        };
        self.base_delay(attempt).saturating_add(Duration::from_millis(jitter))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = BackoffPolicy::default().without_jitter();

        assert_eq!(policy.delay(1, 0), Duration::from_secs(1));
        assert_eq!(policy.delay(2, 0), Duration::from_secs(2));
        assert_eq!(policy.delay(3, 0), Duration::from_secs(4));
        assert_eq!(policy.delay(5, 0), Duration::from_secs(16));
        assert_eq!(policy.delay(6, 0), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX, 0), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_uses_initial_delay() {
        assert_eq!(BackoffPolicy::default().base_delay(0), DEFAULT_INITIAL_DELAY);
    }

    #[test]
    fn jitter_is_bounded() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(1, 0), Duration::from_secs(1));
        assert_eq!(policy.delay(1, 500), Duration::from_millis(1500));
        assert_eq!(policy.delay(1, 501), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_base_delay_is_monotonic(attempt in 0u32..64, initial_ms in 1u64..5_000, mult in 0u32..5) {
            let policy = BackoffPolicy {
                initial_delay: Duration::from_millis(initial_ms),
                multiplier: mult,
                ..BackoffPolicy::default()
            };

            prop_assert!(policy.base_delay(attempt) <= policy.base_delay(attempt + 1));
        }

        #[test]
        fn prop_delay_never_exceeds_cap(attempt in any::<u32>(), entropy in any::<u64>()) {
            let policy = BackoffPolicy::default();

            prop_assert!(policy.delay(attempt, entropy) <= policy.max_delay + policy.max_jitter);
        }
    }
}
