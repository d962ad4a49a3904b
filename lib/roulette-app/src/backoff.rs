//! Backoff strategies.

use std::time::Duration;

/// An exponential backoff strategy.
///
/// Durations double with each consecutive error, starting from the minimum backoff and never exceeding the maximum
/// backoff. The caller tracks the error count and resets it once the operation succeeds again.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given minimum and maximum backoff durations.
    ///
    /// If `max_backoff` is smaller than `min_backoff`, it is raised to `min_backoff`.
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    /// Returns the minimum backoff duration.
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Calculates the backoff duration for the given number of consecutive errors.
    ///
    /// An error count of zero yields the minimum backoff.
    pub fn get_backoff_duration(&self, error_count: u32) -> Duration {
        if error_count == 0 {
            return self.min_backoff;
        }

        self.min_backoff
            .saturating_mul(2u32.saturating_pow(error_count))
            .clamp(self.min_backoff, self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1));

        assert_eq!(backoff.get_backoff_duration(0), Duration::from_millis(10));
        assert_eq!(backoff.get_backoff_duration(1), Duration::from_millis(20));
        assert_eq!(backoff.get_backoff_duration(3), Duration::from_millis(80));
        assert_eq!(backoff.get_backoff_duration(7), Duration::from_secs(1));
        assert_eq!(backoff.get_backoff_duration(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn max_below_min() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.max_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.get_backoff_duration(5), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn property_test_backoff_is_monotonic_and_bounded(
            min_backoff in 1u64..=1_000_000_000,
            extra in 0u64..=1_000_000_000,
            error_count in 0..u32::MAX,
            error_count_increase in 1..5u32,
        ) {
            let backoff = ExponentialBackoff::new(
                Duration::from_nanos(min_backoff),
                Duration::from_nanos(min_backoff + extra),
            );

            let first = backoff.get_backoff_duration(error_count);
            let second = backoff.get_backoff_duration(error_count.saturating_add(error_count_increase));

            prop_assert!(first <= second);
            prop_assert!(first >= backoff.min_backoff());
            prop_assert!(second <= backoff.max_backoff());
        }
    }
}
