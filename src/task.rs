//! The task model: status state machine, per-task runtime state, the
//! cooperative cancel token, and the public [`TaskHandle`] / [`TaskView`]
//! surface.
//!
//! Every task owns one `Mutex<TaskState>`. All mutation happens under
//! that lock, and the lock is always released before callbacks fire, so
//! observers see a linearizable sequence of statuses and a callback can
//! safely call back into the task.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::callback::{CallbackId, CallbackRegistry};
use crate::clock::Clock;
use crate::error::{SchedulerError, TaskError, TaskResult};
use crate::spec::{Priority, TaskSpec};

// ============================================================================
// CANCEL TOKEN
// ============================================================================

/// Cooperative cancellation signal handed to task bodies.
///
/// The scheduler sets the token when a run times out, when the task is
/// stopped or cancelled mid-run, and on shutdown. The body is expected to
/// poll [`is_cancelled`](CancelToken::is_cancelled) at convenient points
/// and return early; nothing is ever forcibly terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// The task state machine.
///
/// `Completed` and `Failed` mark the outcome of the latest run; a task in
/// either state is re-dispatched when its next due time arrives. `Paused`
/// holds until `resume()`, and `Stopped`/`Cancelled` hold until
/// `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Stopped,
    Cancelled,
}

impl TaskStatus {
    /// Statuses from which the dispatcher may launch a run.
    pub fn is_schedulable(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Paused => "paused",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RUNTIME STATE
// ============================================================================

/// Mutable per-task state, always behind the task's mutex.
pub(crate) struct TaskState {
    pub(crate) status: TaskStatus,
    pub(crate) next_due_at: Instant,
    pub(crate) last_run_started_at: Option<Instant>,
    pub(crate) last_run_finished_at: Option<Instant>,
    pub(crate) run_count: u64,
    pub(crate) success_count: u64,
    pub(crate) error_count: u64,
    pub(crate) last_error: Option<TaskError>,
    /// Token for the current (or next) run.
    pub(crate) cancel: CancelToken,
    /// Set by `stop()` while a run is in flight; the run's finalizer
    /// turns it into a `Stopped` transition.
    pub(crate) stop_requested: bool,
    /// Run generation. A finalizer whose epoch no longer matches belongs
    /// to a detached run and must not touch state or fire callbacks.
    pub(crate) run_epoch: u64,
}

/// The callable executed on each run.
pub(crate) type TaskBody = Arc<dyn Fn(&CancelToken) -> TaskResult + Send + Sync>;

/// One registered task: immutable spec + body, mutable state, callbacks.
pub(crate) struct Task {
    pub(crate) name: String,
    pub(crate) spec: TaskSpec,
    pub(crate) body: TaskBody,
    /// Registration order; final dispatch tie-breaker.
    pub(crate) seq: u64,
    pub(crate) state: Mutex<TaskState>,
    pub(crate) callbacks: CallbackRegistry,
}

impl Task {
    pub(crate) fn new(name: String, spec: TaskSpec, body: TaskBody, seq: u64, now: Instant) -> Arc<Self> {
        let next_due_at = if spec.start_immediately() {
            now
        } else {
            now + spec.interval()
        };
        Arc::new(Task {
            name,
            spec,
            body,
            seq,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                next_due_at,
                last_run_started_at: None,
                last_run_finished_at: None,
                run_count: 0,
                success_count: 0,
                error_count: 0,
                last_error: None,
                cancel: CancelToken::new(),
                stop_requested: false,
                run_epoch: 0,
            }),
            callbacks: CallbackRegistry::new(),
        })
    }

    /// Snapshot the state while already holding the lock.
    pub(crate) fn view_locked(&self, state: &TaskState) -> TaskView {
        TaskView {
            name: self.name.clone(),
            priority: self.spec.priority(),
            status: state.status,
            run_count: state.run_count,
            success_count: state.success_count,
            error_count: state.error_count,
            last_error: state.last_error.clone(),
            last_run_started_at: state.last_run_started_at,
            last_run_finished_at: state.last_run_finished_at,
            next_due_at: state.next_due_at,
        }
    }

    /// Snapshot the current state.
    pub(crate) fn view(&self) -> TaskView {
        let state = self.state.lock().unwrap();
        self.view_locked(&state)
    }

    // ------------------------------------------------------------------
    // Lifecycle operations. Each mutates under the lock, then notifies
    // with the lock released.
    // ------------------------------------------------------------------

    pub(crate) fn pause(&self) -> Result<(), SchedulerError> {
        let notification = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                TaskStatus::Paused => None,
                old if old.is_schedulable() => {
                    state.status = TaskStatus::Paused;
                    Some((old, self.view_locked(&state)))
                }
                old => {
                    return Err(SchedulerError::IllegalState(format!(
                        "cannot pause task '{}' while {}",
                        self.name, old
                    )))
                }
            }
        };
        if let Some((old, view)) = notification {
            self.callbacks.notify_status_change(&view, old, TaskStatus::Paused);
        }
        Ok(())
    }

    /// `Paused -> Pending`, keeping `next_due_at` untouched: a task whose
    /// due time passed while paused becomes due immediately.
    pub(crate) fn resume(&self) -> Result<(), SchedulerError> {
        let notification = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                TaskStatus::Paused => {
                    state.status = TaskStatus::Pending;
                    Some((TaskStatus::Paused, self.view_locked(&state)))
                }
                old if old.is_schedulable() => None,
                old => {
                    return Err(SchedulerError::IllegalState(format!(
                        "cannot resume task '{}' while {}",
                        self.name, old
                    )))
                }
            }
        };
        if let Some((old, view)) = notification {
            self.callbacks.notify_status_change(&view, old, TaskStatus::Pending);
        }
        Ok(())
    }

    /// Stop scheduling. A run in flight is asked to cancel and the
    /// `Stopped` transition happens when it returns; otherwise the task
    /// stops on the spot. No-op when already stopped or cancelled.
    pub(crate) fn request_stop(&self) -> Result<(), SchedulerError> {
        let notification = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                TaskStatus::Stopped | TaskStatus::Cancelled => None,
                TaskStatus::Running => {
                    state.stop_requested = true;
                    state.cancel.cancel();
                    None
                }
                old => {
                    state.status = TaskStatus::Stopped;
                    Some((old, self.view_locked(&state)))
                }
            }
        };
        if let Some((old, view)) = notification {
            self.callbacks.notify_status_change(&view, old, TaskStatus::Stopped);
        }
        Ok(())
    }

    /// `Stopped`/`Cancelled -> Pending`. Counters persist; the error,
    /// stop flag and token are fresh, and the due time restarts from the
    /// spec as if the task were newly registered.
    pub(crate) fn reset(&self, now: Instant) -> Result<(), SchedulerError> {
        let notification = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                TaskStatus::Stopped | TaskStatus::Cancelled => {
                    let old = state.status;
                    state.status = TaskStatus::Pending;
                    state.stop_requested = false;
                    state.last_error = None;
                    state.cancel = CancelToken::new();
                    state.next_due_at = if self.spec.start_immediately() {
                        now
                    } else {
                        now + self.spec.interval()
                    };
                    Some((old, self.view_locked(&state)))
                }
                old => {
                    return Err(SchedulerError::IllegalState(format!(
                        "cannot reset task '{}' while {}",
                        self.name, old
                    )))
                }
            }
        };
        if let Some((old, view)) = notification {
            self.callbacks.notify_status_change(&view, old, TaskStatus::Pending);
        }
        Ok(())
    }

    /// `Running -> Cancelled` for shutdown-grace expiry; no-op from any
    /// other status. The run is abandoned the same way `cancel()`
    /// abandons it: token cancelled, epoch bumped, finalizer stale.
    pub(crate) fn cancel_if_running(&self) {
        let notification = {
            let mut state = self.state.lock().unwrap();
            if state.status != TaskStatus::Running {
                return;
            }
            state.cancel.cancel();
            state.run_epoch += 1;
            state.status = TaskStatus::Cancelled;
            self.view_locked(&state)
        };
        self.callbacks
            .notify_status_change(&notification, TaskStatus::Running, TaskStatus::Cancelled);
    }

    /// `any -> Cancelled`, immediately. A run in flight has its token
    /// cancelled and its epoch bumped, so its finalizer becomes stale:
    /// the worker winds down detached without touching state.
    pub(crate) fn cancel(&self) -> Result<(), SchedulerError> {
        let notification = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                TaskStatus::Cancelled => None,
                old => {
                    if old == TaskStatus::Running {
                        state.cancel.cancel();
                        state.run_epoch += 1;
                    }
                    state.status = TaskStatus::Cancelled;
                    Some((old, self.view_locked(&state)))
                }
            }
        };
        if let Some((old, view)) = notification {
            self.callbacks.notify_status_change(&view, old, TaskStatus::Cancelled);
        }
        Ok(())
    }
}

// ============================================================================
// VIEW
// ============================================================================

/// Read-only snapshot of a task, as passed to callbacks.
///
/// A view is a copy: it does not track the task after the snapshot was
/// taken and holds no locks, so callbacks can keep it as long as they
/// like.
#[derive(Debug, Clone)]
pub struct TaskView {
    name: String,
    priority: Priority,
    status: TaskStatus,
    run_count: u64,
    success_count: u64,
    error_count: u64,
    last_error: Option<TaskError>,
    last_run_started_at: Option<Instant>,
    last_run_finished_at: Option<Instant>,
    next_due_at: Instant,
}

impl TaskView {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attempts started, including the one in flight if any.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    pub fn last_run_started_at(&self) -> Option<Instant> {
        self.last_run_started_at
    }

    pub fn last_run_finished_at(&self) -> Option<Instant> {
        self.last_run_finished_at
    }

    pub fn next_due_at(&self) -> Instant {
        self.next_due_at
    }
}

/// Test helper: a view with the given name and default state.
#[cfg(test)]
pub(crate) fn test_view(name: &str) -> TaskView {
    TaskView {
        name: name.to_string(),
        priority: Priority::Normal,
        status: TaskStatus::Pending,
        run_count: 0,
        success_count: 0,
        error_count: 0,
        last_error: None,
        last_run_started_at: None,
        last_run_finished_at: None,
        next_due_at: Instant::now(),
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cloneable per-task handle returned by `Scheduler::register`.
///
/// All operations go through the task's own lock; the handle stays valid
/// after deregistration (operations keep working on the detached task).
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) task: Arc<Task>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.task.name
    }

    /// Snapshot of the task's current state and statistics.
    pub fn view(&self) -> TaskView {
        self.task.view()
    }

    pub fn status(&self) -> TaskStatus {
        self.task.state.lock().unwrap().status
    }

    pub fn run_count(&self) -> u64 {
        self.task.state.lock().unwrap().run_count
    }

    pub fn success_count(&self) -> u64 {
        self.task.state.lock().unwrap().success_count
    }

    pub fn error_count(&self) -> u64 {
        self.task.state.lock().unwrap().error_count
    }

    pub fn last_error(&self) -> Option<TaskError> {
        self.task.state.lock().unwrap().last_error.clone()
    }

    pub fn next_due_at(&self) -> Instant {
        self.task.state.lock().unwrap().next_due_at
    }

    /// Hold the task out of scheduling until `resume()`.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.task.pause()
    }

    /// Return a paused task to `Pending` without losing its due time.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.task.resume()
    }

    /// Stop scheduling until `reset()`. See [`Task::request_stop`] for
    /// the in-flight-run behavior.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.task.request_stop()
    }

    /// Bring a stopped or cancelled task back to `Pending`.
    pub fn reset(&self) -> Result<(), SchedulerError> {
        self.task.reset(self.clock.now())
    }

    /// Cancel the task from any state.
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        self.task.cancel()
    }

    /// Subscribe to every status transition of this task.
    pub fn add_status_change_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView, TaskStatus, TaskStatus) + Send + Sync + 'static,
    {
        self.task.callbacks.add_status_change(callback)
    }

    /// Subscribe to successful runs of this task.
    pub fn add_success_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView) + Send + Sync + 'static,
    {
        self.task.callbacks.add_success(callback)
    }

    /// Subscribe to failed runs of this task.
    pub fn add_failure_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView, &TaskError) + Send + Sync + 'static,
    {
        self.task.callbacks.add_failure(callback)
    }

    pub fn remove_status_change_callback(&self, id: CallbackId) -> bool {
        self.task.callbacks.remove_status_change(id)
    }

    pub fn remove_success_callback(&self, id: CallbackId) -> bool {
        self.task.callbacks.remove_success(id)
    }

    pub fn remove_failure_callback(&self, id: CallbackId) -> bool {
        self.task.callbacks.remove_failure(id)
    }

    /// How many of this task's callback invocations have panicked.
    pub fn callback_error_count(&self) -> u64 {
        self.task.callbacks.callback_error_count()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.task.name)
            .field("status", &self.status())
            .finish()
    }
}
