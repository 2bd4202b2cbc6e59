//! Reconnect backoff.
//!
//! The delay before each re-dial starts at the configured minimum and
//! doubles after every failed attempt, capped at the maximum. A fresh
//! [`Backoff`] is taken for each reconnect episode, so a successful
//! reconnect resets the delay.

use crate::config::ClientConfig;
use rand::Rng;
use std::time::Duration;

const MIN_DELAY_FLOOR: Duration = Duration::from_millis(1);

/// Delay schedule for one reconnect episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    /// A zero `min_delay` is raised to 1ms so re-dials never spin.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let min_delay = min_delay.max(MIN_DELAY_FLOOR);
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            jitter: false,
            attempt: 0,
        }
    }

    /// Backoff using the client's reconnect settings.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.reconnect_min_delay(), config.reconnect_max_delay())
            .with_jitter(config.reconnect_jitter)
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempts taken so far in this episode.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay for a given attempt number (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // min * 2^attempt, saturating well before the cap matters
        let multiplier = 2f64.powi(attempt.min(32) as i32);
        let max_secs = self.max_delay.as_secs_f64();
        let capped_secs = (self.min_delay.as_secs_f64() * multiplier).min(max_secs);

        let final_secs = if self.jitter {
            // Scale by 0.5..1.5 but never go below the minimum or above the cap.
            let mut rng = rand::rng();
            let factor = rng.random_range(0.5..1.5);
            (capped_secs * factor)
                .max(self.min_delay.as_secs_f64())
                .min(max_secs)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over from the minimum delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_min() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));

        // 100 * 2^5 = 3.2s, capped at 400ms
        assert_eq!(backoff.delay_for(5), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(1_000), Duration::from_millis(400));
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400))
            .with_jitter(true);

        for _ in 0..50 {
            let delay = backoff.delay_for(1);
            assert!(
                delay >= Duration::from_millis(100) && delay <= Duration::from_millis(300),
                "Delay {:?} should be between 100ms and 300ms",
                delay
            );
        }
        for _ in 0..50 {
            assert!(backoff.delay_for(4) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_zero_min_delay_never_spins() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));

        let config = ClientConfig::new().with_reconnect_delays(Duration::ZERO, Duration::from_millis(8));
        let backoff = Backoff::from_config(&config);
        assert_eq!(backoff.delay_for(0), Duration::from_millis(1));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(4));
    }

    #[test]
    fn test_from_config() {
        let config = ClientConfig::new()
            .with_reconnect_delays(Duration::from_millis(100), Duration::from_millis(400));
        let backoff = Backoff::from_config(&config);

        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(9), Duration::from_millis(400));
    }
}
