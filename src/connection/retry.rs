// src/connection/retry.rs
use backoff::{ExponentialBackoff, backoff::Backoff};
use std::time::Duration;

/// Reconnect delay: starts at `floor`, doubles after every use, never exceeds
/// `ceiling`. No jitter and no retry limit.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    inner: ExponentialBackoff,
}

impl ReconnectBackoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let inner = ExponentialBackoff {
            current_interval: floor,
            initial_interval: floor,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: ceiling.max(floor),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self { inner }
    }

    /// Delay the next reconnect attempt will wait.
    pub fn current(&self) -> Duration {
        self.inner.current_interval
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        // With no randomisation the crate still adds `random * 1ns` in float
        // math; the timer only has millisecond resolution anyway.
        let delay = self.inner.next_backoff()?;
        Some(Duration::from_millis(delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut backoff = ReconnectBackoff::new(ms(1000), ms(30_000));

        let delays: Vec<_> = (0..8).filter_map(|_| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            vec![
                ms(1000),
                ms(2000),
                ms(4000),
                ms(8000),
                ms(16_000),
                ms(30_000),
                ms(30_000),
                ms(30_000),
            ]
        );
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = ReconnectBackoff::new(ms(1000), ms(30_000));
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.current(), ms(4000));

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(ms(1000)));
    }

    #[test]
    fn test_ceiling_below_floor_is_clamped() {
        let mut backoff = ReconnectBackoff::new(ms(500), ms(100));
        assert_eq!(backoff.next_backoff(), Some(ms(500)));
        assert_eq!(backoff.next_backoff(), Some(ms(500)));
    }

    #[test]
    fn test_delays_carry_no_jitter() {
        let mut backoff = ReconnectBackoff::new(ms(1000), ms(30_000));

        for _ in 0..1000 {
            backoff.reset();
            assert_eq!(backoff.next_backoff(), Some(ms(1000)));
            assert_eq!(backoff.next_backoff(), Some(ms(2000)));
        }
    }
}
