//! Time sources for expiry checks.
//!
//! Backends never read the wall clock directly. They hold an
//! `Arc<dyn Clock>` and read it once per operation, so tests can drive
//! expiry deterministically with a [`TestClock`].

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use parking_lot::RwLock;

/// Supplies the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to whole seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// Manually driven clock for tests.
///
/// Time only moves when [`advance`](Self::advance) or [`set`](Self::set) is
/// called. Share it between the test and the backend with an `Arc`.
///
/// ```
/// use std::sync::Arc;
/// use signurl_storage::{Clock, TestClock};
///
/// let clock = Arc::new(TestClock::new());
/// let start = clock.now();
/// clock.advance(5);
/// assert_eq!((clock.now() - start).num_seconds(), 5);
/// ```
#[derive(Debug)]
pub struct TestClock {
    now: RwLock<DateTime<Utc>>,
}

impl TestClock {
    /// Creates a clock frozen at the current wall-clock second.
    #[must_use]
    pub fn new() -> Self {
        Self::at(SystemClock.now())
    }

    /// Creates a clock frozen at `instant`.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(instant) }
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: u32) {
        let mut now = self.now.write();
        *now += TimeDelta::seconds(i64::from(seconds));
    }

    /// Pins the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
