//! # Fibonacci Backoff
//!
//! Requeue delays after a failed reconcile. The delay grows along the
//! Fibonacci sequence, more slowly than exponential backoff, so a provider
//! that is briefly broken (a Deployment still rolling out, a webhook not yet
//! serving) is retried soon while a persistently broken one settles at the cap.
//!
//! Values are held in minutes and returned in seconds.
//! Sequence with the operator defaults: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//!
//! ## Usage
//!
//! ```rust
//! use capi_provider_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 10);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 120);
//! assert_eq!(backoff.next_backoff_seconds(), 180);
//! ```

use std::time::Duration;

/// Per-trigger Fibonacci backoff state
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum in minutes, restored on reset
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a backoff bounded by `min_minutes` and `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay in seconds; advances the sequence
    ///
    /// ```
    /// use capi_provider_operator::controller::backoff::FibonacciBackoff;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 2);
    /// assert_eq!(backoff.next_backoff_seconds(), 60);
    /// assert_eq!(backoff.next_backoff_seconds(), 60);
    /// assert_eq!(backoff.next_backoff_seconds(), 120);
    /// assert_eq!(backoff.next_backoff_seconds(), 120);
    /// ```
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;

        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);

        result_seconds
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Back to the start of the sequence, after a successful reconcile
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence_and_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let seconds: Vec<u64> = (0..9).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seconds, vec![60, 60, 120, 180, 300, 480, 600, 600, 600]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        for _ in 0..4 {
            backoff.next_backoff_seconds();
        }
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
    }

    #[test]
    fn test_independent_state_per_trigger() {
        let mut core = FibonacciBackoff::new(1, 10);
        let mut infra = FibonacciBackoff::new(1, 10);

        core.next_backoff_seconds();
        core.next_backoff_seconds();
        assert_eq!(core.next_backoff_seconds(), 120);
        assert_eq!(infra.next_backoff_seconds(), 60);

        core.reset();
        assert_eq!(core.next_backoff_seconds(), 60);
        assert_eq!(infra.next_backoff_seconds(), 60);
        assert_eq!(infra.next_backoff_seconds(), 120);
    }
}
