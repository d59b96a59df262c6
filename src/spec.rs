//! Task configuration: priority and the validated `TaskSpec` builder.

use std::time::Duration;

use crate::error::SchedulerError;
use crate::window::TimeWindow;

// ============================================================================
// PRIORITY
// ============================================================================

/// Dispatch priority. When several tasks are due on the same tick, higher
/// priorities launch first. The derived `Ord` follows declaration order:
/// `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Short lowercase label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

// ============================================================================
// TASK SPEC
// ============================================================================

/// Immutable configuration of a periodic task.
///
/// Built through [`TaskSpecBuilder`], which validates on `build()`.
/// After registration the spec never changes; runtime state lives on the
/// task, not here.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub(crate) name: Option<String>,
    pub(crate) interval: Duration,
    pub(crate) priority: Priority,
    pub(crate) time_windows: Vec<TimeWindow>,
    pub(crate) start_immediately: bool,
    pub(crate) max_running_time: Option<Duration>,
}

impl TaskSpec {
    /// Start building a spec that fires every `interval`.
    pub fn every(interval: Duration) -> TaskSpecBuilder {
        TaskSpecBuilder::new(interval)
    }

    /// Start building a spec that fires every `secs` whole seconds.
    pub fn every_secs(secs: u64) -> TaskSpecBuilder {
        TaskSpecBuilder::new(Duration::from_secs(secs))
    }

    /// Start building a spec that fires every `secs` fractional seconds.
    /// Sub-second intervals are supported; the value is normalized to
    /// nanosecond resolution. Non-finite or negative inputs are rejected
    /// at `build()`.
    pub fn every_secs_f64(secs: f64) -> TaskSpecBuilder {
        match Duration::try_from_secs_f64(secs) {
            // A zero duration passes here and is rejected by build().
            Ok(interval) => TaskSpecBuilder::new(interval),
            Err(_) => {
                let mut builder = TaskSpecBuilder::new(Duration::ZERO);
                builder.invalid_interval = true;
                builder
            }
        }
    }

    /// The configured name, if one was supplied. Anonymous specs are
    /// named `task-N` by the scheduler at registration.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The repeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The dispatch priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The admission windows; empty means always admitted.
    pub fn time_windows(&self) -> &[TimeWindow] {
        &self.time_windows
    }

    /// Whether the first due time is "now" rather than `now + interval`.
    pub fn start_immediately(&self) -> bool {
        self.start_immediately
    }

    /// The per-run time limit, if any.
    pub fn max_running_time(&self) -> Option<Duration> {
        self.max_running_time
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`TaskSpec`]. Collects options, validates everything in
/// [`build`](TaskSpecBuilder::build).
#[derive(Debug, Clone)]
pub struct TaskSpecBuilder {
    name: Option<String>,
    interval: Duration,
    priority: Priority,
    time_windows: Vec<TimeWindow>,
    start_immediately: bool,
    max_running_time: Option<Duration>,
    invalid_interval: bool,
}

impl TaskSpecBuilder {
    fn new(interval: Duration) -> Self {
        TaskSpecBuilder {
            name: None,
            interval,
            priority: Priority::Normal,
            time_windows: Vec::new(),
            start_immediately: true,
            max_running_time: None,
            invalid_interval: false,
        }
    }

    /// Name the task. Must be unique within a scheduler and non-empty.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the dispatch priority (default `Normal`).
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add an admission window. May be called repeatedly; the task is
    /// admitted while the time-of-day falls in any of them.
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.time_windows.push(window);
        self
    }

    /// Replace the whole window list.
    pub fn windows(mut self, windows: Vec<TimeWindow>) -> Self {
        self.time_windows = windows;
        self
    }

    /// Whether the first run is due immediately (default `true`). When
    /// `false`, the first due time is one interval after registration.
    pub fn start_immediately(mut self, yes: bool) -> Self {
        self.start_immediately = yes;
        self
    }

    /// Limit a single run to `limit`. A run exceeding it is counted as
    /// failed with a timeout error and its cancel token is signalled.
    pub fn max_running_time(mut self, limit: Duration) -> Self {
        self.max_running_time = Some(limit);
        self
    }

    /// Validate and produce the spec.
    pub fn build(self) -> Result<TaskSpec, SchedulerError> {
        if self.invalid_interval || self.interval.is_zero() {
            return Err(SchedulerError::InvalidSpec(
                "interval must be a positive duration".to_string(),
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(SchedulerError::InvalidSpec(
                    "task name must not be empty".to_string(),
                ));
            }
        }
        if let Some(limit) = self.max_running_time {
            if limit.is_zero() {
                return Err(SchedulerError::InvalidSpec(
                    "max_running_time must be a positive duration".to_string(),
                ));
            }
        }

        Ok(TaskSpec {
            name: self.name,
            interval: self.interval,
            priority: self.priority,
            time_windows: self.time_windows,
            start_immediately: self.start_immediately,
            max_running_time: self.max_running_time,
        })
    }
}
