//! Exponential backoff for reconnect attempts.

use std::time::Duration;

use crate::config::SyncConfig;

/// Upper bound on the growth factor; larger values only reach `max` sooner.
const MAX_FACTOR: f64 = 16.0;

/// Delay sequence `initial, initial * factor, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1.0).min(MAX_FACTOR),
            current: initial,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.backoff_initial(),
            config.backoff_max(),
            config.backoff_factor,
        )
    }

    /// The delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.max, |next| next.min(self.max));
        delay
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350), 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_factor_below_one_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 0.5);
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_huge_factor_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(60), 1e300);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_unbounded_max_saturates_instead_of_panicking() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::MAX, f64::NAN);
        for _ in 0..4 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        }

        let mut backoff = Backoff::new(Duration::from_secs(u64::MAX / 2), Duration::MAX, 16.0);
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn test_from_config() {
        let mut backoff = Backoff::from_config(&SyncConfig::default());
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
