//! Time-of-day admission windows.
//!
//! A window is a closed `[start, end]` range of wall-clock times. A task
//! with windows only launches while the current time-of-day falls inside
//! one of them; a task with no windows is always admitted.

use chrono::NaiveTime;

/// A closed time-of-day range, possibly wrapping past midnight.
///
/// A window where `start > end` wraps: `(23:00, 01:00)` admits from
/// 23:00:00 through midnight to 01:00:00. A degenerate window where
/// `start == end` admits only that exact second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    /// Build a window from two times-of-day. Any pair is valid; a
    /// reversed pair means the window wraps midnight.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        TimeWindow { start, end }
    }

    /// Build a window from hour/minute bounds, e.g. `from_hm(9, 0, 17, 30)`
    /// for 09:00-17:30. Returns `None` on out-of-range components.
    pub fn from_hm(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> Option<Self> {
        Some(TimeWindow {
            start: NaiveTime::from_hms_opt(start_h, start_m, 0)?,
            end: NaiveTime::from_hms_opt(end_h, end_m, 0)?,
        })
    }

    /// The inclusive start of the window.
    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// The inclusive end of the window.
    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Whether `tod` falls inside the window.
    pub fn contains(&self, tod: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= tod && tod <= self.end
        } else {
            // Wraps midnight: inside if after start or before end.
            tod >= self.start || tod <= self.end
        }
    }
}

/// Whether `tod` is admitted by `windows`: an empty list admits
/// everything, otherwise at least one window must contain `tod`.
pub fn admits_any(windows: &[TimeWindow], tod: NaiveTime) -> bool {
    windows.is_empty() || windows.iter().any(|w| w.contains(tod))
}
