//! Fixed-interval ticks.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// A repeating tick at a fixed period.
///
/// A zero period disables the cadence: [`tick`](Self::tick) then pends
/// forever, which lets an actor keep the branch in its `select!` without an
/// `if` guard. The same holds while paused.
///
/// Late wake-ups are skipped rather than replayed; the next tick is always
/// scheduled one period after the one that actually fired.
#[derive(Debug)]
pub struct Cadence {
    name: &'static str,
    period: Option<Duration>,
    next: Option<Instant>,
    count: u64,
    paused: bool,
}

impl Cadence {
    /// Creates a cadence whose first tick lands one period from now, plus a
    /// random offset below `jitter` so that sessions created together do not
    /// tick together.
    pub fn new(name: &'static str, period: Duration, jitter: Duration) -> Self {
        if period.is_zero() {
            debug!(cadence = name, "cadence disabled");
            return Self::disabled(name);
        }

        let jitter_us = u64::try_from(jitter.as_micros()).unwrap_or(u64::MAX);
        let offset = if jitter_us == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rand::rng().random_range(0..jitter_us))
        };

        debug!(cadence = name, ?period, "cadence created");
        Self {
            name,
            period: Some(period),
            next: Some(Instant::now() + period + offset),
            count: 0,
            paused: false,
        }
    }

    /// A cadence that never ticks.
    pub fn disabled(name: &'static str) -> Self {
        Self {
            name,
            period: None,
            next: None,
            count: 0,
            paused: false,
        }
    }

    /// Waits for the next tick and returns its 1-based number.
    pub async fn tick(&mut self) -> u64 {
        let (next, period) = match (self.next, self.period) {
            (Some(next), Some(period)) if !self.paused => (next, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(next);
        if late_by >= period {
            warn!(
                cadence = self.name,
                skipped = late_by.as_nanos() / period.as_nanos(),
                "cadence overran, skipping ahead"
            );
        }

        self.next = Some(now + period);
        self.count += 1;
        trace!(cadence = self.name, tick = self.count, "cadence tick");
        self.count
    }

    /// Pushes the next tick a full period out, e.g. after work that made the
    /// pending tick redundant.
    pub fn reset(&mut self) {
        if let Some(period) = self.period {
            self.next = Some(Instant::now() + period);
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(cadence = self.name, "cadence paused");
        }
    }

    /// Resumes after a pause. The next tick is a full period away; time spent
    /// paused is not made up.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.reset();
            debug!(cadence = self.name, "cadence resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_enabled(&self) -> bool {
        self.period.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Ticks fired so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every(ms: u64) -> Cadence {
        Cadence::new("test", Duration::from_millis(ms), Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_numbered_and_periodic() {
        let start = Instant::now();
        let mut cadence = every(100);

        assert_eq!(cadence.tick().await, 1);
        assert_eq!(Instant::now() - start, Duration::from_millis(100));
        assert_eq!(cadence.tick().await, 2);
        assert_eq!(Instant::now() - start, Duration::from_millis(200));
        assert_eq!(cadence.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_never_ticks() {
        let mut cadence = every(0);
        assert!(!cadence.is_enabled());
        let result =
            time::timeout(Duration::from_secs(60), cadence.tick()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_and_resume_restarts_the_period() {
        let mut cadence = every(100);
        cadence.tick().await;

        cadence.pause();
        cadence.pause();
        assert!(cadence.is_paused());
        let result = time::timeout(Duration::from_secs(1), cadence.tick()).await;
        assert!(result.is_err());

        cadence.resume();
        let resumed_at = Instant::now();
        assert_eq!(cadence.tick().await, 2);
        assert_eq!(Instant::now() - resumed_at, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_skips_instead_of_bursting() {
        let mut cadence = every(100);
        time::advance(Duration::from_millis(550)).await;

        cadence.tick().await;
        let after_first = Instant::now();
        cadence.tick().await;
        assert_eq!(Instant::now() - after_first, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_delays_first_tick_within_bound() {
        let start = Instant::now();
        let mut cadence = Cadence::new(
            "jittered",
            Duration::from_millis(100),
            Duration::from_millis(20),
        );
        cadence.tick().await;
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(120));
    }
}
