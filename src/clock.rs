//! Time sources for the scheduler.
//!
//! Scheduling decisions need two different notions of time: a monotonic
//! "now" for due-time arithmetic (never jumps backwards) and a wall-clock
//! time-of-day for admission windows. Both come from a [`Clock`] trait so
//! tests can drive the scheduler deterministically instead of sleeping
//! against the real clock.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime, Timelike};

/// Source of monotonic time and wall-clock time-of-day.
///
/// The scheduler holds a `Arc<dyn Clock>`; the default is [`SystemClock`].
/// Implementations must be cheap to call -- the dispatch loop queries the
/// clock on every tick.
pub trait Clock: Send + Sync {
    /// Monotonic now. Used for due-time computation and run timestamps.
    fn now(&self) -> Instant;

    /// Wall-clock time-of-day (hour/minute/second). Used only for
    /// admission windows.
    fn time_of_day(&self) -> NaiveTime;
}

/// The real clocks: `Instant::now()` and the local wall time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn time_of_day(&self) -> NaiveTime {
        let now = Local::now();
        // Truncate sub-second precision; windows are second-granular.
        NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
            .unwrap_or(NaiveTime::MIN)
    }
}

/// A clock that only moves when told to.
///
/// `now()` returns a fixed base instant plus an offset that grows via
/// [`advance`](ManualClock::advance); the time-of-day is set explicitly.
/// Both knobs are independent so a test can advance monotonic time
/// without moving the wall clock, and vice versa.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    tod: Mutex<NaiveTime>,
}

impl ManualClock {
    /// A manual clock starting "now" at noon.
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            tod: Mutex::new(NaiveTime::from_hms_opt(12, 0, 0).unwrap()),
        }
    }

    /// Move monotonic time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock().unwrap() += delta;
    }

    /// Set the wall-clock time-of-day returned by `time_of_day()`.
    pub fn set_time_of_day(&self, tod: NaiveTime) {
        *self.tod.lock().unwrap() = tod;
    }

    /// Shorthand for `set_time_of_day` from hour/minute/second.
    /// Panics on out-of-range components (test helper).
    pub fn set_hms(&self, hour: u32, min: u32, sec: u32) {
        self.set_time_of_day(NaiveTime::from_hms_opt(hour, min, sec).unwrap());
    }

    /// How far the clock has been advanced since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn time_of_day(&self) -> NaiveTime {
        *self.tod.lock().unwrap()
    }
}
