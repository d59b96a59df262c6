//! The periodic dispatch loop.
//!
//! Every `check_interval` the loop takes a snapshot of the registered
//! tasks, selects those that are due and inside an admission window, and
//! launches them through the executor in priority order. Dispatch never
//! blocks on a task body; the only place the loop sleeps is the
//! inter-tick wait, which the shutdown signal interrupts immediately.

use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::executor::Executor;
use crate::task::Task;
use crate::window::admits_any;

/// The shared task registry: read-mostly, reader-locked by every tick,
/// writer-locked only by register/deregister.
pub(crate) type TaskRegistry = Arc<RwLock<Vec<Arc<Task>>>>;

pub(crate) struct DispatchLoop {
    tasks: TaskRegistry,
    clock: Arc<dyn Clock>,
    executor: Executor,
    check_interval: Duration,
    shutdown: mpsc::Receiver<()>,
}

impl DispatchLoop {
    pub(crate) fn new(
        tasks: TaskRegistry,
        clock: Arc<dyn Clock>,
        executor: Executor,
        check_interval: Duration,
        shutdown: mpsc::Receiver<()>,
    ) -> Self {
        DispatchLoop {
            tasks,
            clock,
            executor,
            check_interval,
            shutdown,
        }
    }

    /// Tick until the shutdown signal arrives (or the sender is dropped).
    pub(crate) fn run(self) {
        debug!(check_interval_ms = self.check_interval.as_millis() as u64, "dispatch loop started");
        loop {
            self.tick();
            match self.shutdown.recv_timeout(self.check_interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                // A signal and a dropped sender both mean shutdown.
                _ => break,
            }
        }
        debug!("dispatch loop stopped");
    }

    /// One pass over the registry: collect due + admitted tasks, then
    /// launch them ordered by priority (descending), due time
    /// (ascending) and registration order. Each registered task is
    /// considered exactly once per tick.
    pub(crate) fn tick(&self) {
        let now = self.clock.now();
        let tod = self.clock.time_of_day();

        let snapshot: Vec<Arc<Task>> = {
            let tasks = self.tasks.read().unwrap();
            tasks.iter().map(Arc::clone).collect()
        };

        let mut candidates: Vec<(Arc<Task>, Instant)> = Vec::new();
        for task in snapshot {
            let due_at = {
                let state = task.state.lock().unwrap();
                if state.status.is_schedulable() && now >= state.next_due_at {
                    Some(state.next_due_at)
                } else {
                    None
                }
            };
            let Some(due_at) = due_at else { continue };
            if !admits_any(task.spec.time_windows(), tod) {
                trace!(task = %task.name, "due but outside admission windows");
                continue;
            }
            candidates.push((task, due_at));
        }

        candidates.sort_by(|(a, a_due), (b, b_due)| {
            b.spec
                .priority()
                .cmp(&a.spec.priority())
                .then(a_due.cmp(b_due))
                .then(a.seq.cmp(&b.seq))
        });

        for (task, _) in candidates {
            self.executor.launch(task);
        }
    }
}
