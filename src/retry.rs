// src/retry.rs
use backoff::backoff::Backoff;
use std::time::Duration;

use crate::config::BackoffSettings;

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(64000);

/// Reconnect delays for one logical connection.
///
/// The n-th delay (0-based) is `min(initial * multiplier^n, max)`. There is no
/// elapsed-time cutoff: `next_backoff` never returns `None`, the relay keeps
/// retrying until it is told to stop.
#[derive(Debug, Clone)]
pub struct RelayBackoff {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    retry_count: u32,
}

impl RelayBackoff {
    pub fn new(initial_interval: Duration, max_interval: Duration, multiplier: f64) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            retry_count: 0,
        }
    }

    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_ms),
            Duration::from_millis(settings.max_ms),
            settings.multiplier,
        )
    }

    /// Number of retries scheduled since the last reset.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay for the given retry count, without advancing the counter.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        // Past 2^63 every sane policy is already at the cap.
        let factor = self.multiplier.powi(retry_count.min(63) as i32);
        Duration::try_from_secs_f64(self.initial_interval.as_secs_f64() * factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

impl Default for RelayBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL, 2.0)
    }
}

impl Backoff for RelayBackoff {
    fn reset(&mut self) {
        self.retry_count = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.delay_for(self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = RelayBackoff::default();
        let delays: Vec<u128> = (0..10)
            .map(|_| backoff.next_backoff().unwrap().as_millis())
            .collect();

        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 32000, 64000, 64000, 64000, 64000]
        );
        assert_eq!(backoff.retry_count(), 10);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = RelayBackoff::default();
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();

        assert_eq!(backoff.retry_count(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn huge_retry_counts_stay_at_the_cap() {
        let backoff = RelayBackoff::default();
        assert_eq!(backoff.delay_for(u32::MAX), DEFAULT_MAX_INTERVAL);
    }

    #[test]
    fn from_settings_uses_configured_values() {
        let settings = BackoffSettings {
            initial_ms: 250,
            max_ms: 1000,
            multiplier: 3.0,
        };
        let mut backoff = RelayBackoff::from_settings(&settings);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(750)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
    }
}
