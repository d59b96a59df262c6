// Demo: a scheduler wired with a few representative tasks.
//
// Runs the dispatch loop in the background for a few seconds with a
// heartbeat, a lower-priority report, a task that fails every other run,
// a slow task that trips its running-time limit, and a night job gated
// behind an admission window. Prints per-task statistics at the end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use periodic_scheduler::{
    Priority, Scheduler, SchedulerConfig, TaskSpec, TaskStatus, TimeWindow,
};

fn main() -> Result<(), periodic_scheduler::SchedulerError> {
    // Log scheduler internals; RUST_LOG=debug shows per-dispatch events.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("=== Periodic Scheduler Demo ===\n");

    let scheduler = Scheduler::with_config(SchedulerConfig {
        check_interval: Duration::from_millis(50),
        shutdown_grace: Duration::from_secs(2),
        ..SchedulerConfig::default()
    })?;

    // ------------------------------------------------------------------
    // A high-priority heartbeat, twice a second.
    // ------------------------------------------------------------------
    let heartbeat = scheduler.register(
        TaskSpec::every_secs_f64(0.5)
            .name("heartbeat")
            .priority(Priority::High)
            .build()?,
        |_| {
            println!("  [heartbeat] lub-dub");
            Ok(())
        },
    )?;

    // ------------------------------------------------------------------
    // A normal-priority report with a status-change subscription.
    // ------------------------------------------------------------------
    let report = scheduler.register(
        TaskSpec::every_secs(1).name("report").build()?,
        |_| {
            println!("  [report] generating report");
            thread::sleep(Duration::from_millis(30));
            Ok(())
        },
    )?;
    report.add_status_change_callback(|view, old, new| {
        if new == TaskStatus::Running {
            println!("  [report] {} -> {} (run #{})", old, new, view.run_count());
        }
    });

    // ------------------------------------------------------------------
    // A task that fails every other run; failures do not unschedule it.
    // ------------------------------------------------------------------
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = Arc::clone(&attempts);
    let flaky = scheduler.register(
        TaskSpec::every_secs_f64(0.7).name("flaky").priority(Priority::Low).build()?,
        move |_| {
            let n = attempts2.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(format!("synthetic failure #{n}"))
            } else {
                Ok(())
            }
        },
    )?;
    flaky.add_failure_callback(|view, error| {
        println!("  [flaky] failed ({error}); errors so far: {}", view.error_count());
    });

    // ------------------------------------------------------------------
    // A slow task that trips its running-time limit every run.
    // ------------------------------------------------------------------
    let slow = scheduler.register(
        TaskSpec::every_secs(1)
            .name("slow")
            .max_running_time(Duration::from_millis(100))
            .build()?,
        |token| {
            for _ in 0..100 {
                if token.is_cancelled() {
                    // Timed out: wind down without finishing the work.
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        },
    )?;

    // ------------------------------------------------------------------
    // A night job: admitted only between 01:00 and 02:00.
    // ------------------------------------------------------------------
    let night = scheduler.register(
        TaskSpec::every_secs(1)
            .name("night-job")
            .window(TimeWindow::from_hm(1, 0, 2, 0).expect("valid window"))
            .build()?,
        |_| {
            println!("  [night-job] it is night; running");
            Ok(())
        },
    )?;

    println!("Registered {} tasks: {:?}\n", scheduler.task_count(), scheduler.task_names());
    println!("Running for 3 seconds...\n");

    scheduler.start()?;
    thread::sleep(Duration::from_secs(3));
    scheduler.stop();

    println!("\n=== Final Statistics ===\n");
    for handle in [&heartbeat, &report, &flaky, &slow, &night] {
        let view = handle.view();
        println!(
            "  {:<10} status={:<9} runs={:<3} ok={:<3} err={:<3} last_error={}",
            view.name(),
            view.status().as_str(),
            view.run_count(),
            view.success_count(),
            view.error_count(),
            view.last_error().map_or("-".to_string(), |e| e.to_string()),
        );
    }

    println!("\nDone.");
    Ok(())
}
