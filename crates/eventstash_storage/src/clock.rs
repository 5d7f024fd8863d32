//! Time source used for file naming and age checks.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Provides the current wall-clock time.
///
/// File names and every age rule (rotation, settling, retention) are
/// evaluated against this clock, never against `SystemTime::now()` directly.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> SystemTime;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a clock frozen at the given number of milliseconds since the epoch.
    #[must_use]
    pub fn at_millis(millis: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to an arbitrary time (may move backwards).
    pub fn set(&self, to: SystemTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for pre-epoch times.
#[must_use]
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_millis(1_000);
        assert_eq!(millis_since_epoch(clock.now()), 1_000);

        clock.advance(Duration::from_millis(250));
        assert_eq!(millis_since_epoch(clock.now()), 1_250);

        clock.set(UNIX_EPOCH + Duration::from_millis(10));
        assert_eq!(millis_since_epoch(clock.now()), 10);
    }

    #[test]
    fn pre_epoch_saturates() {
        let before = UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(millis_since_epoch(before), 0);
    }
}
