// Integration tests for the periodic scheduler.
//
// Everything time-dependent runs against a ManualClock: the dispatch
// loop ticks on a short real-time cadence, but due-ness only moves when
// a test advances the manual clock, so counts are deterministic. Waits
// are bounded polls, never bare sleeps, except where a test must show
// that nothing happens.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use periodic_scheduler::{
    Clock, ManualClock, Priority, RunMode, Scheduler, SchedulerConfig, SchedulerError, TaskError,
    TaskSpec, TaskStatus, TimeWindow,
};

/// Scheduler on a 5 ms tick driven by a manual clock.
fn manual_scheduler() -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let scheduler = Scheduler::with_config(SchedulerConfig {
        mode: RunMode::Background,
        check_interval: Duration::from_millis(5),
        shutdown_grace: Duration::from_secs(2),
        clock: Arc::clone(&clock) as Arc<dyn Clock>,
    })
    .unwrap();
    (scheduler, clock)
}

/// Poll until `done` holds or two seconds pass.
fn wait_until(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Window long enough for several loop ticks; used to assert that
/// something does NOT happen.
fn settle() {
    thread::sleep(Duration::from_millis(80));
}

// ============================================================================
// SPEC VALIDATION
// ============================================================================

#[test]
fn test_invalid_specs_are_rejected() {
    assert!(matches!(
        TaskSpec::every(Duration::ZERO).build(),
        Err(SchedulerError::InvalidSpec(_))
    ));
    assert!(matches!(
        TaskSpec::every_secs_f64(-0.5).build(),
        Err(SchedulerError::InvalidSpec(_))
    ));
    assert!(matches!(
        TaskSpec::every_secs(1).name("").build(),
        Err(SchedulerError::InvalidSpec(_))
    ));
    assert!(matches!(
        TaskSpec::every_secs(1).max_running_time(Duration::ZERO).build(),
        Err(SchedulerError::InvalidSpec(_))
    ));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let (scheduler, _clock) = manual_scheduler();
    scheduler
        .register(TaskSpec::every_secs(1).name("job").build().unwrap(), |_| Ok(()))
        .unwrap();
    let result =
        scheduler.register(TaskSpec::every_secs(1).name("job").build().unwrap(), |_| Ok(()));
    assert!(matches!(result, Err(SchedulerError::DuplicateName(_))));
}

#[test]
fn test_sub_second_intervals_are_supported() {
    let spec = TaskSpec::every_secs_f64(0.001).build().unwrap();
    assert_eq!(spec.interval(), Duration::from_millis(1));
}

// ============================================================================
// S1 - BASIC PERIODIC
// ============================================================================

#[test]
fn test_s1_basic_periodic_counts_runs() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(TaskSpec::every_secs(10).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();

    // Due immediately at t=0. Wait for the completion, not the launch:
    // the next due time is anchored on the finish.
    assert!(wait_until(|| handle.success_count() == 1));

    clock.advance(Duration::from_secs(10));
    assert!(wait_until(|| handle.success_count() == 2));

    clock.advance(Duration::from_secs(10));
    assert!(wait_until(|| handle.success_count() == 3));

    scheduler.stop();
    assert_eq!(handle.run_count(), 3);
    assert_eq!(handle.success_count(), 3);
    assert_eq!(handle.error_count(), 0);
}

#[test]
fn test_start_immediately_false_waits_one_interval() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(
            TaskSpec::every_secs(10)
                .name("t")
                .start_immediately(false)
                .build()
                .unwrap(),
            |_| Ok(()),
        )
        .unwrap();

    scheduler.start().unwrap();
    settle();
    assert_eq!(handle.run_count(), 0);

    clock.advance(Duration::from_secs(10));
    assert!(wait_until(|| handle.run_count() == 1));
    scheduler.stop();
}

// ============================================================================
// S2 - PRIORITY ORDER
// ============================================================================

#[test]
fn test_s2_same_tick_dispatch_follows_priority() {
    let (scheduler, _clock) = manual_scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [
        ("a-low", Priority::Low),
        ("b-critical", Priority::Critical),
        ("c-normal", Priority::Normal),
    ] {
        let handle = scheduler
            .register(
                TaskSpec::every_secs(1).name(name).priority(priority).build().unwrap(),
                |_| Ok(()),
            )
            .unwrap();
        let log2 = Arc::clone(&log);
        handle.add_status_change_callback(move |view, _, new| {
            if new == TaskStatus::Running {
                log2.lock().unwrap().push(view.name().to_string());
            }
        });
    }

    scheduler.start().unwrap();
    assert!(wait_until(|| log.lock().unwrap().len() == 3));
    scheduler.stop();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["b-critical", "c-normal", "a-low"]
    );
}

#[test]
fn test_dispatch_priorities_never_increase_within_a_tick() {
    let (scheduler, _clock) = manual_scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [
        ("n1", Priority::Normal),
        ("c1", Priority::Critical),
        ("l1", Priority::Low),
        ("h1", Priority::High),
        ("n2", Priority::Normal),
        ("c2", Priority::Critical),
    ] {
        let handle = scheduler
            .register(
                TaskSpec::every_secs(60).name(name).priority(priority).build().unwrap(),
                |_| Ok(()),
            )
            .unwrap();
        let log2 = Arc::clone(&log);
        handle.add_status_change_callback(move |view, _, new| {
            if new == TaskStatus::Running {
                log2.lock().unwrap().push(view.priority());
            }
        });
    }

    scheduler.start().unwrap();
    assert!(wait_until(|| log.lock().unwrap().len() == 6));
    scheduler.stop();

    let priorities = log.lock().unwrap().clone();
    assert!(
        priorities.windows(2).all(|pair| pair[0] >= pair[1]),
        "dispatch order was not non-increasing: {priorities:?}"
    );
}

// ============================================================================
// S3 - WINDOW ADMISSION
// ============================================================================

#[test]
fn test_s3_window_gates_execution() {
    let (scheduler, clock) = manual_scheduler();
    clock.set_hms(8, 59, 59);

    let handle = scheduler
        .register(
            TaskSpec::every_secs(1)
                .name("office-hours")
                .window(TimeWindow::from_hm(9, 0, 17, 0).unwrap())
                .build()
                .unwrap(),
            |_| Ok(()),
        )
        .unwrap();

    scheduler.start().unwrap();

    // 08:59:59 - due but not admitted.
    settle();
    assert_eq!(handle.run_count(), 0);

    // 09:00:00 - the window opens and the pending due time fires.
    clock.set_hms(9, 0, 0);
    assert!(wait_until(|| handle.success_count() == 1));

    // 17:00:01 - due again, but the window has closed: no run, no
    // counter movement.
    clock.set_hms(17, 0, 1);
    clock.advance(Duration::from_secs(1));
    settle();
    assert_eq!(handle.run_count(), 1);
    assert_eq!(handle.success_count(), 1);

    scheduler.stop();
}

#[test]
fn test_window_wrapping_midnight_admits_on_both_sides() {
    let w = TimeWindow::from_hm(23, 0, 1, 0).unwrap();
    let tod = |h, m, s| chrono::NaiveTime::from_hms_opt(h, m, s).unwrap();

    assert!(w.contains(tod(23, 59, 59)));
    assert!(w.contains(tod(0, 0, 1)));
    assert!(!w.contains(tod(12, 0, 0)));
}

#[test]
fn test_windowless_task_is_always_admitted() {
    let (scheduler, clock) = manual_scheduler();
    clock.set_hms(3, 33, 3);

    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("anytime").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.run_count() == 1));
    scheduler.stop();
}

// ============================================================================
// S4 - TIMEOUT
// ============================================================================

#[test]
fn test_s4_timeout_fails_the_run_once() {
    let (scheduler, _clock) = manual_scheduler();
    let failures = Arc::new(AtomicUsize::new(0));

    let failures2 = Arc::clone(&failures);
    let handle = scheduler
        .register(
            TaskSpec::every_secs(60)
                .name("sleepy")
                .max_running_time(Duration::from_millis(50))
                .build()
                .unwrap(),
            |_| {
                thread::sleep(Duration::from_millis(400));
                Ok(())
            },
        )
        .unwrap();
    handle.add_failure_callback(move |_, error| {
        assert!(error.is_timeout());
        failures2.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.status() == TaskStatus::Failed));

    assert_eq!(handle.last_error(), Some(TaskError::Timeout));
    assert_eq!(handle.run_count(), 1);
    assert_eq!(handle.error_count(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    // The detached body finishing later must not add an outcome.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(handle.success_count(), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    scheduler.stop();
}

// ============================================================================
// S5 - PAUSE / RESUME
// ============================================================================

#[test]
fn test_s5_pause_skips_runs_and_resume_catches_up() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(TaskSpec::every_secs(10).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.success_count() == 1));

    // Pause at t=5: the task holds, its due time (t=10) stands.
    clock.advance(Duration::from_secs(5));
    handle.pause().unwrap();
    assert_eq!(handle.status(), TaskStatus::Paused);

    // t=10 passes while paused: no run.
    clock.advance(Duration::from_secs(5));
    settle();
    assert_eq!(handle.run_count(), 1);

    // Resume at t=15: the due time of t=10 is already past, so the task
    // runs immediately.
    clock.advance(Duration::from_secs(5));
    handle.resume().unwrap();
    assert!(wait_until(|| handle.run_count() == 2));

    scheduler.stop();
}

#[test]
fn test_pause_resume_preserves_due_ordering() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(
            TaskSpec::every_secs(10)
                .name("t")
                .start_immediately(false)
                .build()
                .unwrap(),
            |_| Ok(()),
        )
        .unwrap();
    let due_before = handle.next_due_at();

    handle.pause().unwrap();
    handle.resume().unwrap();
    assert_eq!(handle.next_due_at(), due_before);
    assert_eq!(handle.status(), TaskStatus::Pending);

    // Still not due before its original time.
    scheduler.start().unwrap();
    settle();
    assert_eq!(handle.run_count(), 0);
    clock.advance(Duration::from_secs(10));
    assert!(wait_until(|| handle.run_count() == 1));
    scheduler.stop();
}

// ============================================================================
// S6 - FAILURE CONTINUATION
// ============================================================================

#[test]
fn test_s6_failures_do_not_unschedule() {
    let (scheduler, clock) = manual_scheduler();
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts2 = Arc::clone(&attempts);
    let handle = scheduler
        .register(
            TaskSpec::every_secs(1).name("flaky").build().unwrap(),
            move |_| {
                let n = attempts2.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 1 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(())
                }
            },
        )
        .unwrap();

    scheduler.start().unwrap();
    for expected in 1..=6u64 {
        assert!(wait_until(
            || handle.success_count() + handle.error_count() == expected
        ));
        if expected < 6 {
            clock.advance(Duration::from_secs(1));
        }
    }
    scheduler.stop();

    assert_eq!(handle.run_count(), 6);
    assert_eq!(handle.success_count(), 3);
    assert_eq!(handle.error_count(), 3);
    // The sixth attempt (index 5) failed, and the error stuck around.
    assert_eq!(handle.last_error(), Some(TaskError::Failed("attempt 5 failed".to_string())));
    // Still schedulable after all that.
    assert!(handle.status().is_schedulable());
}

#[test]
fn test_success_clears_last_error() {
    let (scheduler, clock) = manual_scheduler();
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts2 = Arc::clone(&attempts);
    let handle = scheduler
        .register(
            TaskSpec::every_secs(1).name("recovers").build().unwrap(),
            move |_| {
                if attempts2.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("first attempt fails".to_string())
                } else {
                    Ok(())
                }
            },
        )
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.error_count() == 1));
    assert!(handle.last_error().is_some());

    clock.advance(Duration::from_secs(1));
    assert!(wait_until(|| handle.success_count() == 1));
    assert_eq!(handle.last_error(), None);
    scheduler.stop();
}

#[test]
fn test_panicking_body_is_a_failure_not_a_crash() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(
            TaskSpec::every_secs(1).name("panics").build().unwrap(),
            |_| panic!("body bug"),
        )
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.error_count() == 1));
    assert_eq!(handle.last_error(), Some(TaskError::Panicked("body bug".to_string())));

    // The scheduler survived and reschedules the task.
    clock.advance(Duration::from_secs(1));
    assert!(wait_until(|| handle.error_count() == 2));
    scheduler.stop();
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[test]
fn test_observed_status_sequence_is_a_valid_path() {
    let (scheduler, clock) = manual_scheduler();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts2 = Arc::clone(&attempts);
    let handle = scheduler
        .register(
            TaskSpec::every_secs(1).name("walker").build().unwrap(),
            move |_| {
                if attempts2.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                    Err("odd attempt".to_string())
                } else {
                    Ok(())
                }
            },
        )
        .unwrap();
    let transitions2 = Arc::clone(&transitions);
    handle.add_status_change_callback(move |_, old, new| {
        transitions2.lock().unwrap().push((old, new));
    });

    scheduler.start().unwrap();
    // Each cycle logs exactly two transitions (-> Running, -> outcome);
    // advance only once both have landed so the log stays sequential.
    for cycle in 1..=4usize {
        assert!(wait_until(|| transitions.lock().unwrap().len() == 2 * cycle));
        if cycle < 4 {
            clock.advance(Duration::from_secs(1));
        }
    }
    // Exercise the lifecycle edges with the loop out of the picture, so
    // no dispatch interleaves with them.
    scheduler.stop();
    handle.pause().unwrap();
    handle.resume().unwrap();
    handle.stop().unwrap();
    handle.reset().unwrap();
    handle.cancel().unwrap();

    let allowed = |old: TaskStatus, new: TaskStatus| -> bool {
        use TaskStatus::*;
        match (old, new) {
            (Pending | Completed | Failed, Running) => true,
            (Running, Completed | Failed | Stopped) => true,
            (Pending | Completed | Failed, Paused) => true,
            (Paused, Pending) => true,
            (Pending | Completed | Failed | Paused, Stopped) => true,
            (Stopped | Cancelled, Pending) => true,
            (_, Cancelled) => true,
            _ => false,
        }
    };

    let log = transitions.lock().unwrap();
    assert!(!log.is_empty());
    for (old, new) in log.iter() {
        assert!(allowed(*old, *new), "illegal transition {old} -> {new}");
    }
    // Consecutive transitions chain: each edge starts where the previous
    // one ended.
    for pair in log.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "gap in transition chain: {log:?}");
    }
}

#[test]
fn test_stop_then_reset_restores_scheduling_and_keeps_counters() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.success_count() == 1));

    handle.stop().unwrap();
    assert_eq!(handle.status(), TaskStatus::Stopped);

    // Sticky: due times come and go, nothing runs.
    clock.advance(Duration::from_secs(5));
    settle();
    assert_eq!(handle.run_count(), 1);

    handle.reset().unwrap();
    // start_immediately makes the reset task due right away, and the
    // old counters survive.
    assert!(wait_until(|| handle.success_count() == 2));
    assert_eq!(handle.run_count(), 2);
    scheduler.stop();
}

#[test]
fn test_cancel_is_sticky_until_reset() {
    let (scheduler, clock) = manual_scheduler();
    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.run_count() == 1));

    handle.cancel().unwrap();
    assert_eq!(handle.status(), TaskStatus::Cancelled);

    clock.advance(Duration::from_secs(5));
    settle();
    assert_eq!(handle.run_count(), 1);

    handle.reset().unwrap();
    assert!(wait_until(|| handle.run_count() == 2));
    scheduler.stop();
}

#[test]
fn test_stop_during_run_ends_in_stopped_without_outcome() {
    let (scheduler, _clock) = manual_scheduler();
    let outcomes = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .register(
            TaskSpec::every_secs(60).name("cooperative").build().unwrap(),
            |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            },
        )
        .unwrap();
    let outcomes2 = Arc::clone(&outcomes);
    handle.add_success_callback(move |_| {
        outcomes2.fetch_add(1, Ordering::SeqCst);
    });
    let outcomes3 = Arc::clone(&outcomes);
    handle.add_failure_callback(move |_, _| {
        outcomes3.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.status() == TaskStatus::Running));

    handle.stop().unwrap();
    assert!(wait_until(|| handle.status() == TaskStatus::Stopped));

    assert_eq!(outcomes.load(Ordering::SeqCst), 0);
    // The aborted attempt stays counted, but never gets an outcome:
    // run_count runs one ahead of success + error here.
    assert_eq!(handle.run_count(), 1);
    assert_eq!(handle.success_count(), 0);
    assert_eq!(handle.error_count(), 0);
    scheduler.stop();
}

#[test]
fn test_pause_while_running_is_illegal() {
    let (scheduler, _clock) = manual_scheduler();
    let release = Arc::new(AtomicBool::new(false));

    let release2 = Arc::clone(&release);
    let handle = scheduler
        .register(
            TaskSpec::every_secs(60).name("busy").build().unwrap(),
            move |_| {
                while !release2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            },
        )
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.status() == TaskStatus::Running));

    assert!(matches!(handle.pause(), Err(SchedulerError::IllegalState(_))));

    release.store(true, Ordering::SeqCst);
    assert!(wait_until(|| handle.status() == TaskStatus::Completed));
    scheduler.stop();
}

// ============================================================================
// CONCURRENCY INVARIANTS
// ============================================================================

#[test]
fn test_no_overlapping_executions_even_with_tiny_interval() {
    let (scheduler, clock) = manual_scheduler();
    let concurrent = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));

    let concurrent2 = Arc::clone(&concurrent);
    let overlapped2 = Arc::clone(&overlapped);
    let handle = scheduler
        .register(
            TaskSpec::every(Duration::from_nanos(1)).name("hot").build().unwrap(),
            move |_| {
                if concurrent2.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlapped2.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(20));
                concurrent2.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    scheduler.start().unwrap();
    // Keep making the task due while runs are still in flight.
    for _ in 0..20 {
        clock.advance(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(10));
    }
    scheduler.stop();

    assert!(!overlapped.load(Ordering::SeqCst), "two bodies ran at once");
    assert!(handle.run_count() >= 2);
    assert_eq!(handle.run_count(), handle.success_count());
}

#[test]
fn test_run_intervals_are_disjoint() {
    let (scheduler, clock) = manual_scheduler();
    let spans = Arc::new(Mutex::new(Vec::new()));

    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();
    let spans2 = Arc::clone(&spans);
    handle.add_success_callback(move |view| {
        spans2.lock().unwrap().push((
            view.last_run_started_at().unwrap(),
            view.last_run_finished_at().unwrap(),
        ));
    });

    scheduler.start().unwrap();
    // Gate each advance on the span landing, so entries arrive in run
    // order.
    for expected in 1..=3usize {
        assert!(wait_until(|| spans.lock().unwrap().len() == expected));
        clock.advance(Duration::from_secs(1));
    }
    scheduler.stop();

    let spans = spans.lock().unwrap();
    for pair in spans.windows(2) {
        let (_, first_end) = pair[0];
        let (second_start, _) = pair[1];
        assert!(second_start >= first_end, "overlapping run spans");
    }
}

#[test]
fn test_slow_run_does_not_stall_other_tasks() {
    let (scheduler, _clock) = manual_scheduler();
    let blocked = Arc::new(AtomicBool::new(true));

    let blocked2 = Arc::clone(&blocked);
    scheduler
        .register(
            TaskSpec::every_secs(60).name("slow").build().unwrap(),
            move |_| {
                while blocked2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            },
        )
        .unwrap();
    let quick = scheduler
        .register(TaskSpec::every_secs(60).name("quick").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    // The quick task completes while the slow one is still running.
    assert!(wait_until(|| quick.success_count() == 1));

    blocked.store(false, Ordering::SeqCst);
    scheduler.stop();
}

// ============================================================================
// CALLBACKS
// ============================================================================

#[test]
fn test_callback_panic_is_counted_and_isolated() {
    let (scheduler, _clock) = manual_scheduler();
    let successes = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .register(TaskSpec::every_secs(60).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();
    handle.add_success_callback(|_| panic!("bad subscriber"));
    let successes2 = Arc::clone(&successes);
    handle.add_success_callback(move |_| {
        successes2.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| successes.load(Ordering::SeqCst) == 1));
    scheduler.stop();

    // The panic went to the callback-error counter, not the task's.
    assert_eq!(handle.callback_error_count(), 1);
    assert_eq!(handle.error_count(), 0);
    assert_eq!(handle.success_count(), 1);
}

#[test]
fn test_removed_callback_no_longer_fires() {
    let (scheduler, clock) = manual_scheduler();
    let hits = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();
    let hits2 = Arc::clone(&hits);
    let id = handle.add_success_callback(move |_| {
        hits2.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1));

    assert!(handle.remove_success_callback(id));
    clock.advance(Duration::from_secs(1));
    assert!(wait_until(|| handle.success_count() == 2));
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_no_callbacks_after_stop_returns() {
    let (scheduler, clock) = manual_scheduler();
    let events = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();
    let events2 = Arc::clone(&events);
    handle.add_status_change_callback(move |_, _, _| {
        events2.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.success_count() == 1));

    scheduler.stop();
    let after_stop = events.load(Ordering::SeqCst);

    clock.advance(Duration::from_secs(30));
    settle();
    assert_eq!(events.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_scheduler_stop_is_idempotent() {
    let (scheduler, _clock) = manual_scheduler();
    scheduler
        .register(TaskSpec::every_secs(1).name("t").build().unwrap(), |_| Ok(()))
        .unwrap();

    scheduler.start().unwrap();
    scheduler.stop();
    scheduler.stop();
    scheduler.stop();
    assert!(!scheduler.is_running());
}

#[test]
fn test_deregister_while_running_detaches_the_run() {
    let (scheduler, _clock) = manual_scheduler();

    let handle = scheduler
        .register(
            TaskSpec::every_secs(60).name("goner").build().unwrap(),
            |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            },
        )
        .unwrap();

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.status() == TaskStatus::Running));

    scheduler.deregister("goner").unwrap();
    assert_eq!(scheduler.task_count(), 0);
    assert_eq!(handle.status(), TaskStatus::Cancelled);

    // The detached body saw its token and wound down; no outcome lands.
    settle();
    assert_eq!(handle.success_count(), 0);
    assert_eq!(handle.error_count(), 0);
    scheduler.stop();
}

// ============================================================================
// HANDLE-DRIVEN DISABLEMENT (documented embedder pattern)
// ============================================================================

#[test]
fn test_failure_callback_can_stop_the_task() {
    let (scheduler, clock) = manual_scheduler();

    let handle = scheduler
        .register(
            TaskSpec::every_secs(1).name("fragile").build().unwrap(),
            |_| Err("always fails".to_string()),
        )
        .unwrap();
    let stopper = handle.clone();
    handle.add_failure_callback(move |view, _| {
        if view.error_count() >= 2 {
            let _ = stopper.stop();
        }
    });

    scheduler.start().unwrap();
    assert!(wait_until(|| handle.error_count() == 1));
    clock.advance(Duration::from_secs(1));
    assert!(wait_until(|| handle.status() == TaskStatus::Stopped));
    scheduler.stop();

    assert_eq!(handle.error_count(), 2);
}
