//! Exponential backoff for broker reconnects and task restarts.
//!
//! Delays start at `initial_delay` and double on each consecutive failure,
//! capped at `max_delay`. With [`Backoff::RECONNECT`] the sequence is
//! 1s, 2s, 4s, 8s, 16s, 30s, 30s, ... There is no attempt limit: broker
//! outages are retried for as long as the process runs.

use std::time::Duration;

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier applied per consecutive failure (typically 2.0).
    pub multiplier: f64,
}

impl Backoff {
    /// Reconnect schedule: 1s base, doubling, 30s cap.
    pub const RECONNECT: Self = Self {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    };

    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Past 64 doublings every realistic schedule is already at the cap.
        let exponent = attempt.min(64) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// Starts a fresh attempt counter for this schedule.
    pub fn start(self) -> Retry {
        Retry {
            backoff: self,
            attempt: 0,
        }
    }
}

/// Tracks consecutive failures against a [`Backoff`] schedule.
#[derive(Debug, Clone)]
pub struct Retry {
    backoff: Backoff,
    attempt: u32,
}

impl Retry {
    /// Returns the delay to wait before the next attempt and records the failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Clears the failure count after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reconnect_schedule_doubles_then_caps() {
        let mut retry = Backoff::RECONNECT.start();
        let delays: Vec<u64> = (0..8).map(|_| retry.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut retry = Backoff::RECONNECT.start();
        retry.next_delay();
        retry.next_delay();
        assert_eq!(retry.attempt(), 2);

        retry.reset();

        assert_eq!(retry.attempt(), 0);
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let backoff = Backoff::RECONNECT;
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn custom_schedule() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50), 3.0);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(30));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(50));
    }

    proptest! {
        /// Delays never decrease and never exceed the cap.
        #[test]
        fn delays_are_monotonic_and_bounded(attempts in 1u32..200) {
            let backoff = Backoff::RECONNECT;
            let mut previous = Duration::ZERO;
            for attempt in 0..attempts {
                let delay = backoff.delay_for_attempt(attempt);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= backoff.max_delay);
                previous = delay;
            }
        }
    }
}
