//! # Fibonacci Backoff
//!
//! Retry delays for failed reconcile passes. The sequence grows more slowly
//! than exponential backoff and is expressed in whole minutes:
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).

use std::time::Duration;

/// Shortest delay, in minutes
pub const MIN_BACKOFF_MINUTES: u64 = 1;
/// Longest delay, in minutes
pub const MAX_BACKOFF_MINUTES: u64 = 10;

/// Stateful Fibonacci backoff.
///
/// Used for `Sonar` resources, which carry no failure counter in their status.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_MINUTES, MAX_BACKOFF_MINUTES)
    }
}

impl FibonacciBackoff {
    /// Create a backoff bounded by `min_minutes` and `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Returns the current delay and advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);
        delay
    }

    /// Stateless delay for a persisted failure counter.
    ///
    /// Counts 0 and 1 map to the minimum; each further failure moves one step
    /// along the sequence, capped at `max_minutes`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min_minutes: u64, max_minutes: u64) -> Duration {
        let mut prev_minutes = min_minutes;
        let mut current_minutes = min_minutes;
        for _ in 2..=error_count {
            if current_minutes >= max_minutes {
                break;
            }
            let next_minutes = prev_minutes + current_minutes;
            prev_minutes = current_minutes;
            current_minutes = next_minutes.min(max_minutes);
        }
        Duration::from_secs(current_minutes.min(max_minutes) * 60)
    }

    /// `calculate_for_error_count` with the default bounds
    #[must_use]
    pub fn for_failure_count(failure_count: u32) -> Duration {
        Self::calculate_for_error_count(failure_count, MIN_BACKOFF_MINUTES, MAX_BACKOFF_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(d: Duration) -> u64 {
        d.as_secs() / 60
    }

    #[test]
    fn test_sequence_caps_at_max() {
        let mut backoff = FibonacciBackoff::default();
        let observed: Vec<u64> = (0..9).map(|_| minutes(backoff.next_backoff())).collect();
        assert_eq!(observed, vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_failure_count_matches_stateful_sequence() {
        let expected = [1, 1, 2, 3, 5, 8, 10, 10, 10];
        for (count, want) in expected.iter().enumerate() {
            assert_eq!(
                minutes(FibonacciBackoff::for_failure_count(count as u32)),
                *want,
                "failure count {}",
                count
            );
        }
    }
}
