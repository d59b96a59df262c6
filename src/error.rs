//! Error types surfaced by the scheduler.
//!
//! Two layers, kept separate on purpose: `SchedulerError` covers
//! registration and lifecycle calls (returned to the embedder), while
//! `TaskError` describes why a single task run failed (stored on the
//! task as `last_error` and handed to failure callbacks). A failing run
//! is never a `SchedulerError` -- the loop keeps scheduling the task.

use thiserror::Error;

/// The result a task body returns. `Err` carries the failure message
/// that ends up in [`TaskError::Failed`].
pub type TaskResult = Result<(), String>;

/// Errors returned by registration and lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The task configuration failed validation.
    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    /// A task with the same name is already registered.
    #[error("a task named '{0}' is already registered")]
    DuplicateName(String),

    /// No task with the given name is registered.
    #[error("no task named '{0}' is registered")]
    NotFound(String),

    /// The operation is not valid in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// `start()` was called on a scheduler that already ran.
    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Why a single task run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The run exceeded the spec's `max_running_time`. Synthesized by
    /// the executor; carries no user message.
    #[error("task exceeded its maximum running time")]
    Timeout,

    /// The body returned `Err` with this message.
    #[error("task failed: {0}")]
    Failed(String),

    /// The body panicked; the payload is the panic message when it was
    /// a string, or a placeholder otherwise.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// True for the synthesized timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }
}
