use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nucleor_core::{
    ParallelConfig, SchedulerError, ShutdownSignal, TaskError, TaskOutcome, TaskState,
};
use parking_lot::Mutex;

use super::ParallelScheduler;

fn scheduler(workers: usize, capacity: usize) -> ParallelScheduler {
    ParallelScheduler::new(
        ParallelConfig {
            worker_threads: workers,
            queue_capacity: capacity,
            shutdown_timeout_ms: 100,
        },
        ShutdownSignal::new(),
    )
    .unwrap()
}

/// Tick until `done` holds or the deadline passes.
fn tick_until(s: &ParallelScheduler, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        s.tick().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn callback_runs_on_owner_thread() {
    let s = scheduler(2, 16);
    let owner = std::thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    s.schedule(
        |_| Ok(6 * 7),
        move |outcome: TaskOutcome<i32>| {
            *sink.lock() = Some((std::thread::current().id(), outcome.value()));
        },
    )
    .unwrap();

    tick_until(&s, || seen.lock().is_some());
    assert_eq!(*seen.lock(), Some((owner, Some(42))));
    assert_eq!(s.status().completed, 1);
}

#[test]
fn callback_never_fires_without_tick() {
    let s = scheduler(1, 4);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    s.schedule(|_| Ok(()), move |_| flag.store(true, Ordering::SeqCst))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while s.status().awaiting_callback == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!fired.load(Ordering::SeqCst));

    s.tick().unwrap();
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn failing_work_still_calls_back() {
    let s = scheduler(2, 16);
    let states = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&states);
    s.schedule(
        |_| -> Result<(), TaskError> { Err(TaskError::failed("nope")) },
        move |outcome| sink.lock().push(outcome.state()),
    )
    .unwrap();
    let sink = Arc::clone(&states);
    s.schedule(
        |_| -> Result<(), TaskError> { panic!("worker blew up") },
        move |outcome| sink.lock().push(outcome.state()),
    )
    .unwrap();

    let mut failures = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while states.lock().len() < 2 && Instant::now() < deadline {
        failures += s.tick().unwrap().failed;
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(*states.lock(), vec![TaskState::Failed, TaskState::Failed]);
    assert_eq!(failures, 2);
    assert_eq!(s.status().failed, 2);
}

#[test]
fn saturation_fails_fast() {
    let s = scheduler(1, 2);
    let gate = Arc::new(AtomicBool::new(false));

    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        s.schedule(
            move |_| {
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            |_: TaskOutcome<()>| {},
        )
        .unwrap();
    }

    let err = s.schedule(|_| Ok(()), |_: TaskOutcome<()>| {}).unwrap_err();
    assert_eq!(err, SchedulerError::Saturated { capacity: 2 });

    gate.store(true, Ordering::SeqCst);
    tick_until(&s, || s.in_flight() == 0);
    assert!(s.schedule(|_| Ok(()), |_: TaskOutcome<()>| {}).is_ok());
}

#[test]
fn cancel_before_start_prevents_work() {
    let s = scheduler(1, 8);
    let gate = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));

    let blocker_gate = Arc::clone(&gate);
    let blocker_started = Arc::clone(&started);
    s.schedule(
        move |_| {
            blocker_started.store(true, Ordering::SeqCst);
            while !blocker_gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        },
        |_: TaskOutcome<()>| {},
    )
    .unwrap();
    while !started.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }

    let ran = Arc::new(AtomicBool::new(false));
    let called_back = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);
    let cb_flag = Arc::clone(&called_back);
    let queued = s
        .schedule(
            move |_| {
                ran_flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            move |_: TaskOutcome<()>| cb_flag.store(true, Ordering::SeqCst),
        )
        .unwrap();

    assert!(s.cancel(&queued));
    assert_eq!(queued.state(), TaskState::Cancelled);
    assert!(!s.cancel(&queued));

    gate.store(true, Ordering::SeqCst);
    tick_until(&s, || s.in_flight() == 0);
    s.tick().unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!called_back.load(Ordering::SeqCst));
    assert_eq!(s.status().cancelled, 1);
}

#[test]
fn cancel_running_sets_flag() {
    let s = scheduler(1, 4);
    let started = Arc::new(AtomicBool::new(false));
    let outcome = Arc::new(Mutex::new(None));

    let started_flag = Arc::clone(&started);
    let sink = Arc::clone(&outcome);
    let handle = s
        .schedule(
            move |token| {
                started_flag.store(true, Ordering::SeqCst);
                loop {
                    token.check()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
            },
            move |out: TaskOutcome<()>| *sink.lock() = Some(out.state()),
        )
        .unwrap();
    while !started.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(!s.cancel(&handle));
    tick_until(&s, || outcome.lock().is_some());
    assert_eq!(*outcome.lock(), Some(TaskState::Cancelled));
    assert_eq!(handle.state(), TaskState::Cancelled);
}

#[test]
fn clear_cancels_only_pending() {
    let s = scheduler(1, 8);
    let gate = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));

    let g = Arc::clone(&gate);
    let st = Arc::clone(&started);
    let running = s
        .schedule(
            move |_| {
                st.store(true, Ordering::SeqCst);
                while !g.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            |_: TaskOutcome<()>| {},
        )
        .unwrap();
    while !started.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }
    let queued: Vec<_> = (0..3)
        .map(|_| s.schedule(|_| Ok(()), |_: TaskOutcome<()>| {}).unwrap())
        .collect();

    assert_eq!(s.clear(), 3);
    assert!(queued.iter().all(|h| h.state() == TaskState::Cancelled));
    assert_eq!(running.state(), TaskState::Running);

    gate.store(true, Ordering::SeqCst);
    tick_until(&s, || running.state() == TaskState::Completed);
}

#[test]
fn dispose_rejects_further_work() {
    let s = scheduler(2, 8);
    let report = s.dispose().unwrap();
    assert!(report.abandoned.is_empty());
    assert_eq!(
        s.schedule(|_| Ok(()), |_: TaskOutcome<()>| {}).unwrap_err(),
        SchedulerError::ShuttingDown
    );
    assert_eq!(s.dispose().unwrap(), Default::default());
}

#[test]
fn tick_off_owner_thread_is_refused() {
    let s = Arc::new(scheduler(1, 4));
    s.tick().unwrap();
    let other = Arc::clone(&s);
    let result = std::thread::spawn(move || other.tick().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(SchedulerError::NotOwningThread { .. })));
}

#[test]
fn forced_abandon_error_carries_timeout() {
    let report = super::DisposeReport {
        abandoned: vec![nucleor_core::TaskId(3)],
        timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(
        errors,
        vec![SchedulerError::ForcedAbandon {
            id: nucleor_core::TaskId(3),
            timeout: Duration::from_millis(100),
        }]
    );
}

#[test]
fn nested_tick_is_refused_and_delivery_keeps_arrival_order() {
    let s = Arc::new(scheduler(1, 8));
    let order = Arc::new(Mutex::new(Vec::new()));
    let nested = Arc::new(Mutex::new(None));

    let first_order = Arc::clone(&order);
    let first_nested = Arc::clone(&nested);
    let inner = Arc::clone(&s);
    s.schedule(
        |_| Ok(()),
        move |_: TaskOutcome<()>| {
            first_order.lock().push(0);
            let late_order = Arc::clone(&first_order);
            inner
                .schedule(|_| Ok(()), move |_: TaskOutcome<()>| late_order.lock().push(2))
                .unwrap();
            // Wait for the late task to finish so a nested tick could see it.
            let deadline = Instant::now() + Duration::from_secs(5);
            while inner.status().awaiting_callback < 3 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            *first_nested.lock() = Some(inner.tick().map(|r| r.executed));
        },
    )
    .unwrap();
    let second_order = Arc::clone(&order);
    s.schedule(|_| Ok(()), move |_: TaskOutcome<()>| second_order.lock().push(1))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while s.status().awaiting_callback < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let report = s.tick().unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(
        *nested.lock(),
        Some(Err(SchedulerError::Reentrant { operation: "tick" }))
    );
    assert_eq!(*order.lock(), vec![0, 1]);

    tick_until(&s, || order.lock().len() == 3);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}
