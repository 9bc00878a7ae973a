//! Injectable wall time.
//!
//! Nothing in the engine reads the system clock directly. Live scenes use
//! [`SystemClock`]; replays and tests use [`FixedClock`] or [`LogicalClock`]
//! so that every timestamp in the log is reproducible.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of "now" for log entries and reaction-window expiry.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Live system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Deterministic clock advancing a fixed step on every read.
///
/// Starts at `start` and returns `start + n * step` on the n-th call.
#[derive(Debug)]
pub struct LogicalClock {
    millis: AtomicI64,
    step_millis: i64,
}

impl LogicalClock {
    /// Create a clock starting at `start`, advancing `step` per read.
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
            step_millis: step.num_milliseconds(),
        }
    }

    /// Clock starting at the Unix epoch with one-second steps.
    pub fn from_epoch() -> Self {
        Self::new(DateTime::<Utc>::default(), Duration::seconds(1))
    }

    /// Move time forward without consuming a read.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.fetch_add(self.step_millis, Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_clock_steps() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = LogicalClock::new(start, Duration::milliseconds(500));

        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::milliseconds(500));
        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now(), start + Duration::milliseconds(11_000));
    }

    #[test]
    fn test_logical_clocks_agree() {
        let a = LogicalClock::from_epoch();
        let b = LogicalClock::from_epoch();
        for _ in 0..10 {
            assert_eq!(a.now(), b.now());
        }
    }

    #[test]
    fn test_fixed_clock() {
        let at = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let clock = FixedClock(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }
}
