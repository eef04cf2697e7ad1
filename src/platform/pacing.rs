//! Jittered pause between outbound sends.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Inclusive range the pause between two sends is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPacing {
    min: Duration,
    max: Duration,
}

impl SendPacing {
    /// Build a pacing range. Bounds are swapped if given out of order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw one delay from the range.
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Sleep for one drawn delay.
    pub async fn pause(&self) {
        if self.is_disabled() {
            return;
        }
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Pacing before next send");
        tokio::time::sleep(delay).await;
    }
}

impl Default for SendPacing {
    fn default() -> Self {
        Self::new(Duration::from_secs(45), Duration::from_secs(75))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_within_bounds() {
        let pacing = SendPacing::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn swapped_bounds_are_normalized() {
        let pacing = SendPacing::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(pacing, SendPacing::new(Duration::from_secs(1), Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn none_returns_immediately() {
        let pacing = SendPacing::none();
        assert!(pacing.is_disabled());
        tokio::time::timeout(Duration::from_millis(50), pacing.pause())
            .await
            .unwrap();
    }
}
