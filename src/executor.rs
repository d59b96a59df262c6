//! Runs a single task invocation in isolation.
//!
//! The dispatch loop hands a selected task to [`Executor::launch`], which
//! re-checks eligibility under the task lock, flips the status to
//! `Running`, and moves the actual body onto a worker thread so one slow
//! task can never stall the loop or its neighbors.
//!
//! Timeout enforcement is cooperative: when `max_running_time` elapses,
//! the run's cancel token is signalled, a `Timeout` failure is recorded,
//! and the body thread is detached. The body keeps running until it
//! honors the token (or finishes on its own); its eventual result is
//! discarded because its run epoch is stale by then.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::TaskError;
use crate::task::{CancelToken, Task, TaskBody, TaskStatus};
use crate::window::admits_any;

// ============================================================================
// IN-FLIGHT ACCOUNTING
// ============================================================================

/// Counts workers between launch and finalization so shutdown can wait
/// for them (bounded by the grace period).
pub(crate) struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    pub(crate) fn new() -> Self {
        Inflight {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn enter(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn exit(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn active(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Wait until no worker is in flight. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self.idle.wait_timeout(count, remaining).unwrap();
            count = guard;
        }
        true
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Launches task invocations on worker threads and records outcomes.
pub(crate) struct Executor {
    clock: Arc<dyn Clock>,
    inflight: Arc<Inflight>,
}

impl Executor {
    pub(crate) fn new(clock: Arc<dyn Clock>, inflight: Arc<Inflight>) -> Self {
        Executor { clock, inflight }
    }

    /// Try to start one run of `task`. Silently does nothing when the
    /// task lost eligibility between selection and launch (another
    /// dispatch won, or a lifecycle operation intervened); advances the
    /// due time without running when the admission window closed in that
    /// gap.
    pub(crate) fn launch(&self, task: Arc<Task>) {
        let now = self.clock.now();

        let (epoch, token, old_status, view) = {
            let mut state = task.state.lock().unwrap();
            if !state.status.is_schedulable() || now < state.next_due_at {
                return;
            }
            if !admits_any(task.spec.time_windows(), self.clock.time_of_day()) {
                state.next_due_at += task.spec.interval();
                debug!(task = %task.name, "admission window closed before launch; skipping run");
                return;
            }
            let old = state.status;
            state.status = TaskStatus::Running;
            state.run_count += 1;
            state.last_run_started_at = Some(now);
            state.run_epoch += 1;
            state.cancel = CancelToken::new();
            (
                state.run_epoch,
                state.cancel.clone(),
                old,
                task.view_locked(&state),
            )
        };

        debug!(task = %task.name, priority = task.spec.priority().as_str(), "dispatching run");
        // The run counts as in flight from the moment its CAS succeeded,
        // not from when its worker thread comes up: shutdown must not
        // slip through the gap in between.
        self.inflight.enter();
        // Announce the transition here, before the worker exists: within a
        // tick, subscribers observe `-> Running` in dispatch order, and for
        // one task this always precedes the outcome notifications.
        task.callbacks
            .notify_status_change(&view, old_status, TaskStatus::Running);

        let clock = Arc::clone(&self.clock);
        let inflight = Arc::clone(&self.inflight);
        let worker_task = Arc::clone(&task);
        let spawned = thread::Builder::new()
            .name(format!("task-{}", task.name))
            .spawn(move || {
                let outcome = run_body(&worker_task, &token);
                finalize(&worker_task, clock.as_ref(), epoch, outcome);
                inflight.exit();
            });

        if let Err(err) = spawned {
            warn!(task = %task.name, error = %err, "failed to spawn worker thread");
            finalize(
                &task,
                self.clock.as_ref(),
                epoch,
                Err(TaskError::Failed(format!("failed to spawn worker: {err}"))),
            );
            self.inflight.exit();
        }
    }
}

// ============================================================================
// BODY EXECUTION
// ============================================================================

/// Run the body, with the timeout watchdog when the spec has one.
fn run_body(task: &Task, token: &CancelToken) -> Result<(), TaskError> {
    let Some(limit) = task.spec.max_running_time() else {
        return invoke(&task.body, token);
    };

    let (tx, rx) = mpsc::channel();
    let body = Arc::clone(&task.body);
    let body_token = token.clone();
    let spawned = thread::Builder::new()
        .name(format!("task-{}-body", task.name))
        .spawn(move || {
            let _ = tx.send(invoke(&body, &body_token));
        });
    if let Err(err) = spawned {
        return Err(TaskError::Failed(format!("failed to spawn worker: {err}")));
    }

    match rx.recv_timeout(limit) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            // Signal the body and walk away; it is detached from here on.
            token.cancel();
            warn!(task = %task.name, limit_ms = limit.as_millis() as u64, "run exceeded max_running_time");
            Err(TaskError::Timeout)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(TaskError::Panicked(
            "worker exited without reporting a result".to_string(),
        )),
    }
}

/// Call the body, converting `Err` and panics into task errors.
fn invoke(body: &TaskBody, token: &CancelToken) -> Result<(), TaskError> {
    match catch_unwind(AssertUnwindSafe(|| body(token))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(TaskError::Failed(message)),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

// ============================================================================
// FINALIZATION
// ============================================================================

/// Record a run's outcome: status transition, counters, timestamps, and
/// the finish-anchored next due time. A finalizer whose epoch no longer
/// matches (the run was cancelled or abandoned) does nothing.
fn finalize(task: &Task, clock: &dyn Clock, epoch: u64, outcome: Result<(), TaskError>) {
    enum Recorded {
        Success,
        Failure(TaskError),
        Stopped,
    }

    let notification = {
        let mut state = task.state.lock().unwrap();
        if state.run_epoch != epoch || state.status != TaskStatus::Running {
            debug!(task = %task.name, "discarding result of a detached run");
            return;
        }

        let now = clock.now();
        state.last_run_finished_at = Some(now);
        // Finish-anchored: a slow run pushes the next one out instead of
        // piling up missed ticks.
        state.next_due_at = now + task.spec.interval();

        let recorded = if state.stop_requested {
            state.stop_requested = false;
            state.status = TaskStatus::Stopped;
            Recorded::Stopped
        } else {
            match outcome {
                Ok(()) => {
                    state.status = TaskStatus::Completed;
                    state.success_count += 1;
                    state.last_error = None;
                    Recorded::Success
                }
                Err(error) => {
                    state.status = TaskStatus::Failed;
                    state.error_count += 1;
                    state.last_error = Some(error.clone());
                    Recorded::Failure(error)
                }
            }
        };
        (state.status, task.view_locked(&state), recorded)
    };

    let (new_status, view, recorded) = notification;
    task.callbacks
        .notify_status_change(&view, TaskStatus::Running, new_status);
    match recorded {
        Recorded::Success => task.callbacks.notify_success(&view),
        Recorded::Failure(error) => {
            warn!(task = %task.name, error = %error, "run failed");
            task.callbacks.notify_failure(&view, &error);
        }
        // A stopped run reports only the status change.
        Recorded::Stopped => {}
    }
}
