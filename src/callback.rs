//! Per-task callback fan-out.
//!
//! Three independent subscriber sets: status-change, success, failure.
//! Notification iterates a snapshot taken under the internal lock and
//! invokes subscribers with the lock released, so a callback may add or
//! remove callbacks (the change takes effect on the next notification)
//! and may call back into the scheduler without deadlocking.
//!
//! A panicking callback never reaches scheduler logic or its sibling
//! callbacks: each invocation is isolated and panics are counted on a
//! callback-error counter, separate from the task's `error_count`.
//! Notifications may arrive concurrently from different worker threads;
//! subscribers must tolerate that.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::TaskError;
use crate::task::{TaskStatus, TaskView};

/// Removal token returned by the `add_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type StatusChangeFn = Arc<dyn Fn(&TaskView, TaskStatus, TaskStatus) + Send + Sync>;
type SuccessFn = Arc<dyn Fn(&TaskView) + Send + Sync>;
type FailureFn = Arc<dyn Fn(&TaskView, &TaskError) + Send + Sync>;

/// The three callback sets of one task.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    status_change: Mutex<Vec<(CallbackId, StatusChangeFn)>>,
    success: Mutex<Vec<(CallbackId, SuccessFn)>>,
    failure: Mutex<Vec<(CallbackId, FailureFn)>>,
    callback_errors: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry {
            next_id: AtomicU64::new(1),
            status_change: Mutex::new(Vec::new()),
            success: Mutex::new(Vec::new()),
            failure: Mutex::new(Vec::new()),
            callback_errors: AtomicU64::new(0),
        }
    }

    fn fresh_id(&self) -> CallbackId {
        CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to every status transition: `(view, old, new)`.
    pub fn add_status_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView, TaskStatus, TaskStatus) + Send + Sync + 'static,
    {
        let id = self.fresh_id();
        self.status_change.lock().unwrap().push((id, Arc::new(callback)));
        id
    }

    /// Subscribe to successful runs.
    pub fn add_success<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView) + Send + Sync + 'static,
    {
        let id = self.fresh_id();
        self.success.lock().unwrap().push((id, Arc::new(callback)));
        id
    }

    /// Subscribe to failed runs: `(view, error)`.
    pub fn add_failure<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TaskView, &TaskError) + Send + Sync + 'static,
    {
        let id = self.fresh_id();
        self.failure.lock().unwrap().push((id, Arc::new(callback)));
        id
    }

    /// Remove a status-change subscriber. Returns whether it was present.
    pub fn remove_status_change(&self, id: CallbackId) -> bool {
        Self::remove(&self.status_change, id)
    }

    /// Remove a success subscriber. Returns whether it was present.
    pub fn remove_success(&self, id: CallbackId) -> bool {
        Self::remove(&self.success, id)
    }

    /// Remove a failure subscriber. Returns whether it was present.
    pub fn remove_failure(&self, id: CallbackId) -> bool {
        Self::remove(&self.failure, id)
    }

    fn remove<T>(set: &Mutex<Vec<(CallbackId, T)>>, id: CallbackId) -> bool {
        let mut entries = set.lock().unwrap();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// How many callback invocations have panicked so far.
    pub fn callback_error_count(&self) -> u64 {
        self.callback_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn notify_status_change(&self, view: &TaskView, old: TaskStatus, new: TaskStatus) {
        let snapshot: Vec<StatusChangeFn> = {
            let entries = self.status_change.lock().unwrap();
            entries.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for callback in snapshot {
            self.invoke(|| callback(view, old, new), "status-change", view);
        }
    }

    pub(crate) fn notify_success(&self, view: &TaskView) {
        let snapshot: Vec<SuccessFn> = {
            let entries = self.success.lock().unwrap();
            entries.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for callback in snapshot {
            self.invoke(|| callback(view), "success", view);
        }
    }

    pub(crate) fn notify_failure(&self, view: &TaskView, error: &TaskError) {
        let snapshot: Vec<FailureFn> = {
            let entries = self.failure.lock().unwrap();
            entries.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for callback in snapshot {
            self.invoke(|| callback(view, error), "failure", view);
        }
    }

    /// Run one callback, swallowing and counting a panic.
    fn invoke<F: FnOnce()>(&self, call: F, kind: &str, view: &TaskView) {
        if catch_unwind(AssertUnwindSafe(call)).is_err() {
            self.callback_errors.fetch_add(1, Ordering::Relaxed);
            warn!(task = %view.name(), kind, "callback panicked; ignoring");
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
