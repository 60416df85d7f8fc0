//! Injectable clock
//!
//! All time-dependent logic (routing windows, budget scans, retry delays,
//! timeouts, the idle nudge) reads through this trait so tests can pin time.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock abstraction: wall-clock now, local hour of day, and async sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Hour of day in [0, 24), derived from `now()` unless overridden
    fn hour_of_day(&self) -> u32 {
        self.now().hour()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real clock backed by `chrono::Utc` and `tokio::time`
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock pinned to a fixed instant. `sleep` returns immediately and
/// advances the pinned time by the requested duration.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn pinned(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Pin to an arbitrary date at the given hour (UTC)
    pub fn at_hour(hour: u32) -> Self {
        let base = Utc::now()
            .with_hour(hour)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .unwrap_or_else(Utc::now);
        Self::pinned(base)
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero());
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_pins_time() {
        let clock = ManualClock::at_hour(8);
        assert_eq!(clock.hour_of_day(), 8);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(clock.hour_of_day(), 9);
    }

    #[tokio::test]
    async fn test_manual_sleep_advances_without_waiting() {
        let clock = ManualClock::at_hour(12);
        let before = clock.now();
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!((clock.now() - before).num_seconds(), 30);
    }

    #[test]
    fn test_system_clock_hour_range() {
        let hour = SystemClock.hour_of_day();
        assert!(hour < 24);
    }
}
