//! # periodic-scheduler
//!
//! An in-process periodic task scheduler: register a callable with an
//! interval and the dispatch loop runs it on a worker thread every time
//! it comes due, honoring dispatch priorities, time-of-day admission
//! windows, and per-run time limits. Every task exposes a small state
//! machine (pause/resume/stop/reset/cancel) and fans its transitions out
//! to status, success, and failure callbacks.
//!
//! ```no_run
//! use periodic_scheduler::{Scheduler, TaskSpec};
//!
//! let scheduler = Scheduler::new();
//! scheduler.register(
//!     TaskSpec::every_secs(60).name("heartbeat").build()?,
//!     |_token| {
//!         println!("lub-dub");
//!         Ok(())
//!     },
//! )?;
//! scheduler.start()?; // background mode: returns immediately
//! # Ok::<(), periodic_scheduler::SchedulerError>(())
//! ```
//!
//! Scheduling is cooperative end to end: a run that outlives its
//! `max_running_time` is counted as failed and handed a cancelled token,
//! but never forcibly killed. Time is injectable ([`clock::ManualClock`])
//! so schedules can be tested without sleeping.

pub mod callback;
pub mod clock;
pub mod error;
pub mod scheduler;
pub mod spec;
pub mod task;
pub mod window;

mod dispatch;
mod executor;

pub use callback::CallbackId;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SchedulerError, TaskError, TaskResult};
pub use scheduler::{RunMode, Scheduler, SchedulerConfig};
pub use spec::{Priority, TaskSpec, TaskSpecBuilder};
pub use task::{CancelToken, TaskHandle, TaskStatus, TaskView};
pub use window::{admits_any, TimeWindow};

/// The names most embedders want in scope.
pub mod prelude {
    pub use crate::error::{SchedulerError, TaskError, TaskResult};
    pub use crate::scheduler::{RunMode, Scheduler, SchedulerConfig};
    pub use crate::spec::{Priority, TaskSpec};
    pub use crate::task::{CancelToken, TaskHandle, TaskStatus, TaskView};
    pub use crate::window::TimeWindow;
}
