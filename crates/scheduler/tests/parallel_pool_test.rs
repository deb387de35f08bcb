//! Integration tests for the parallel scheduler's rendezvous and shutdown.
//!
//! Work runs on a real rayon pool; every callback must come back on the
//! test thread, which plays the owning thread.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nucleor_core::{ParallelConfig, SchedulerError, ShutdownSignal, TaskOutcome, TaskState};
use nucleor_scheduler::ParallelScheduler;
use parking_lot::Mutex;

const DEADLINE: Duration = Duration::from_secs(10);

fn pool(workers: usize, capacity: usize, timeout_ms: u64) -> ParallelScheduler {
    ParallelScheduler::new(
        ParallelConfig {
            worker_threads: workers,
            queue_capacity: capacity,
            shutdown_timeout_ms: timeout_ms,
        },
        ShutdownSignal::new(),
    )
    .unwrap()
}

#[test]
fn thousand_tasks_come_back_on_owner_thread() {
    let scheduler = pool(4, 1024, 2_000);
    assert_eq!(scheduler.worker_threads(), 4);
    let owner = std::thread::current().id();
    let results = Arc::new(Mutex::new(Vec::new()));

    for i in 0..1_000u64 {
        let sink = Arc::clone(&results);
        scheduler
            .schedule(
                move |_| Ok(i * 2),
                move |outcome: TaskOutcome<u64>| {
                    let on_owner = std::thread::current().id() == owner;
                    sink.lock().push((i, outcome.value(), on_owner));
                },
            )
            .unwrap();
    }

    let start = Instant::now();
    while results.lock().len() < 1_000 && start.elapsed() < DEADLINE {
        scheduler.tick().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    let results = results.lock();
    assert_eq!(results.len(), 1_000);
    let mut seen = HashSet::new();
    for (i, value, on_owner) in results.iter() {
        assert!(seen.insert(*i), "duplicate callback for task {i}");
        assert_eq!(*value, Some(i * 2));
        assert!(on_owner, "callback for task {i} ran off the owning thread");
    }

    let status = scheduler.status();
    assert_eq!(status.completed, 1_000);
    assert_eq!(status.awaiting_callback, 0);
    assert_eq!(status.running, 0);
}

#[test]
fn dispose_abandons_only_overrunning_work() {
    let scheduler = pool(4, 16, 100);
    let release = Arc::new(AtomicBool::new(false));
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let mut quick = Vec::new();
    for i in 0..2u32 {
        let sink = Arc::clone(&delivered);
        quick.push(
            scheduler
                .schedule(move |_| Ok(i), move |out: TaskOutcome<u32>| {
                    sink.lock().push(out.value())
                })
                .unwrap(),
        );
    }

    let mut slow = Vec::new();
    for _ in 0..2 {
        let gate = Arc::clone(&release);
        let sink = Arc::clone(&delivered);
        slow.push(
            scheduler
                .schedule(
                    move |_| {
                        while !gate.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Ok(99u32)
                    },
                    move |out: TaskOutcome<u32>| sink.lock().push(out.value()),
                )
                .unwrap(),
        );
    }

    // Let the quick ones finish and the slow ones start.
    let start = Instant::now();
    while !(quick.iter().all(|h| h.is_terminal())
        && slow.iter().all(|h| h.state() == TaskState::Running))
        && start.elapsed() < DEADLINE
    {
        std::thread::sleep(Duration::from_millis(1));
    }

    let report = scheduler.dispose().unwrap();
    release.store(true, Ordering::SeqCst);

    let mut abandoned: Vec<_> = slow.iter().map(|h| h.id()).collect();
    abandoned.sort();
    assert_eq!(report.abandoned, abandoned);
    assert_eq!(report.delivered, 2);

    let mut values: Vec<_> = delivered.lock().iter().copied().collect();
    values.sort();
    assert_eq!(values, vec![Some(0), Some(1)]);

    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| matches!(e, SchedulerError::ForcedAbandon { timeout, .. } if *timeout == Duration::from_millis(100))));

    assert!(slow.iter().all(|h| h.state() == TaskState::Failed));
    assert_eq!(scheduler.status().abandoned, 2);

    // Late results of abandoned work are discarded.
    std::thread::sleep(Duration::from_millis(50));
    scheduler.tick().unwrap();
    assert_eq!(delivered.lock().len(), 2);
}

#[test]
fn producers_on_many_threads_share_one_pool() {
    let scheduler = Arc::new(pool(2, 1024, 2_000));
    let total = Arc::new(Mutex::new(0u64));

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let scheduler = Arc::clone(&scheduler);
            let total = Arc::clone(&total);
            std::thread::spawn(move || {
                for i in 0..50u64 {
                    let total = Arc::clone(&total);
                    scheduler
                        .schedule(move |_| Ok(p * 100 + i), move |out: TaskOutcome<u64>| {
                            *total.lock() += out.value().unwrap_or(0);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let start = Instant::now();
    while scheduler.status().completed < 200 && start.elapsed() < DEADLINE {
        scheduler.tick().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    let expected: u64 = (0..4u64)
        .flat_map(|p| (0..50u64).map(move |i| p * 100 + i))
        .sum();
    assert_eq!(*total.lock(), expected);
}
