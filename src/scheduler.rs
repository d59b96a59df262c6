//! The public scheduler façade.
//!
//! A `Scheduler` owns the task registry and the dispatch loop. In
//! `Background` mode `start()` spawns the loop on its own thread and
//! returns; in `Foreground` mode it runs the loop on the caller's thread
//! until some other thread calls `stop()`. Either way the scheduler is
//! shared by reference (`&self` everywhere), so it can live in an `Arc`
//! and be driven from callbacks and other threads alike.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::dispatch::{DispatchLoop, TaskRegistry};
use crate::error::{SchedulerError, TaskResult};
use crate::executor::{Executor, Inflight};
use crate::spec::TaskSpec;
use crate::task::{CancelToken, Task, TaskHandle, TaskStatus};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Where the dispatch loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// `start()` blocks the calling thread until `stop()`.
    Foreground,
    /// `start()` spawns the loop thread and returns.
    #[default]
    Background,
}

/// Scheduler construction options. Plain fields; fill in what you need
/// over `Default`.
#[derive(Clone)]
pub struct SchedulerConfig {
    pub mode: RunMode,
    /// How often the dispatch loop scans for due tasks. Must be > 0.
    pub check_interval: Duration,
    /// How long `stop()` waits for in-flight runs before abandoning them.
    pub shutdown_grace: Duration,
    /// Time source; swap in a `ManualClock` for deterministic tests.
    pub clock: Arc<dyn Clock>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            mode: RunMode::Background,
            check_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Lifecycle of the scheduler itself. One-shot: once stopped, a
/// scheduler does not start again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct Scheduler {
    tasks: TaskRegistry,
    clock: Arc<dyn Clock>,
    mode: Mutex<RunMode>,
    check_interval: Duration,
    shutdown_grace: Duration,
    inflight: Arc<Inflight>,
    phase: Mutex<Phase>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
    auto_name: AtomicU64,
    next_seq: AtomicU64,
}

impl Scheduler {
    /// A scheduler with the default configuration (background mode,
    /// 100 ms check interval, 5 s shutdown grace, system clock).
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
            .expect("default configuration is valid")
    }

    /// A scheduler with explicit configuration. Rejects a zero
    /// `check_interval`.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if config.check_interval.is_zero() {
            return Err(SchedulerError::IllegalState(
                "check_interval must be a positive duration".to_string(),
            ));
        }
        Ok(Scheduler {
            tasks: Arc::new(RwLock::new(Vec::new())),
            clock: config.clock,
            mode: Mutex::new(config.mode),
            check_interval: config.check_interval,
            shutdown_grace: config.shutdown_grace,
            inflight: Arc::new(Inflight::new()),
            phase: Mutex::new(Phase::Idle),
            shutdown_tx: Mutex::new(None),
            loop_thread: Mutex::new(None),
            auto_name: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        })
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a task. The body runs on a worker thread on every
    /// dispatch and should poll the [`CancelToken`] if it runs long.
    /// Works before and after `start()`.
    pub fn register<F>(&self, spec: TaskSpec, body: F) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn(&CancelToken) -> TaskResult + Send + Sync + 'static,
    {
        let mut tasks = self.tasks.write().unwrap();

        let name = match spec.name() {
            Some(name) => {
                if tasks.iter().any(|t| t.name == name) {
                    return Err(SchedulerError::DuplicateName(name.to_string()));
                }
                name.to_string()
            }
            None => self.fresh_auto_name(&tasks),
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(name, spec, Arc::new(body), seq, self.clock.now());
        info!(
            task = %task.name,
            interval_ms = task.spec.interval().as_millis() as u64,
            priority = task.spec.priority().as_str(),
            "registered task"
        );
        tasks.push(Arc::clone(&task));

        Ok(TaskHandle {
            task,
            clock: Arc::clone(&self.clock),
        })
    }

    /// Remove a task by name. A run already in flight is cancelled and
    /// winds down detached; the name is free for reuse immediately.
    pub fn deregister(&self, name: &str) -> Result<(), SchedulerError> {
        let removed = {
            let mut tasks = self.tasks.write().unwrap();
            let index = tasks
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
            tasks.remove(index)
        };
        // Cancel outside the registry lock; this may fire callbacks.
        let _ = removed.cancel();
        info!(task = %name, "deregistered task");
        Ok(())
    }

    fn fresh_auto_name(&self, tasks: &[Arc<Task>]) -> String {
        loop {
            let n = self.auto_name.fetch_add(1, Ordering::Relaxed) + 1;
            let name = format!("task-{n}");
            if !tasks.iter().any(|t| t.name == name) {
                return name;
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Handle to a registered task.
    pub fn task(&self, name: &str) -> Result<TaskHandle, SchedulerError> {
        let tasks = self.tasks.read().unwrap();
        tasks
            .iter()
            .find(|t| t.name == name)
            .map(|task| TaskHandle {
                task: Arc::clone(task),
                clock: Arc::clone(&self.clock),
            })
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))
    }

    /// Registered task names, in registration order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .read()
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// The configured run mode.
    pub fn mode(&self) -> RunMode {
        *self.mode.lock().unwrap()
    }

    /// Change the run mode. Only allowed before `start()`.
    pub fn set_mode(&self, mode: RunMode) -> Result<(), SchedulerError> {
        let phase = self.phase.lock().unwrap();
        if *phase != Phase::Idle {
            return Err(SchedulerError::IllegalState(
                "mode cannot change after start()".to_string(),
            ));
        }
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }

    /// Whether the dispatch loop is live.
    pub fn is_running(&self) -> bool {
        *self.phase.lock().unwrap() == Phase::Running
    }

    /// Begin dispatching. In `Foreground` mode this blocks until another
    /// thread calls [`stop`](Scheduler::stop); in `Background` mode it
    /// returns once the loop thread is up. Starting twice (or after a
    /// stop) is an error.
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase != Phase::Idle {
                return Err(SchedulerError::AlreadyStarted);
            }
            *phase = Phase::Running;
        }
        let mode = self.mode();

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let dispatch = DispatchLoop::new(
            Arc::clone(&self.tasks),
            Arc::clone(&self.clock),
            Executor::new(Arc::clone(&self.clock), Arc::clone(&self.inflight)),
            self.check_interval,
            shutdown_rx,
        );

        info!(?mode, tasks = self.task_count(), "scheduler starting");
        match mode {
            RunMode::Foreground => {
                dispatch.run();
            }
            RunMode::Background => {
                let handle = thread::Builder::new()
                    .name("scheduler-dispatch".to_string())
                    .spawn(move || dispatch.run())
                    .map_err(|err| {
                        *self.phase.lock().unwrap() = Phase::Stopped;
                        SchedulerError::IllegalState(format!(
                            "failed to spawn dispatch thread: {err}"
                        ))
                    })?;
                *self.loop_thread.lock().unwrap() = Some(handle);
            }
        }
        Ok(())
    }

    /// Shut down. Signals the loop, joins it, cancels the tokens of all
    /// in-flight runs, and waits up to `shutdown_grace` for their workers
    /// to finalize. Workers still busy at grace expiry are abandoned and
    /// their tasks marked `Cancelled`. Idempotent; a no-op before
    /// `start()`. After `stop()` returns, no further callbacks fire.
    pub fn stop(&self) {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase != Phase::Running {
                return;
            }
            *phase = Phase::Stopped;
        }
        info!("scheduler stopping");

        // Wake the loop out of its inter-tick sleep and let it exit.
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let joinable = {
            let mut guard = self.loop_thread.lock().unwrap();
            match guard.take() {
                // A callback running on the dispatch thread may call
                // stop(); the loop exits on its own, just not under us.
                Some(handle) if handle.thread().id() == thread::current().id() => None,
                other => other,
            }
        };
        if let Some(handle) = joinable {
            let _ = handle.join();
        }

        // Ask every in-flight run to wind down, then give the workers the
        // grace period to finalize.
        let snapshot: Vec<Arc<Task>> = {
            let tasks = self.tasks.read().unwrap();
            tasks.iter().map(Arc::clone).collect()
        };
        for task in &snapshot {
            let state = task.state.lock().unwrap();
            if state.status == TaskStatus::Running {
                state.cancel.cancel();
            }
        }
        if !self.inflight.wait_idle(self.shutdown_grace) {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                still_running = self.inflight.active(),
                "shutdown grace expired; abandoning still-running tasks"
            );
            for task in &snapshot {
                task.cancel_if_running();
            }
        }
        info!("scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
