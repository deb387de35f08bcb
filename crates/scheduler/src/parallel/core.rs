use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use nucleor_core::{
    CancelToken, IdSequence, OwnerThread, ParallelConfig, SchedulerError, SchedulerResult,
    ShutdownSignal, TaskCell, TaskError, TaskHandle, TaskId, TaskOutcome, TaskResult, TaskState,
    run_isolated,
};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::guard::TickGuard;
use crate::status::{StatusSnapshot, TickReport};

use super::worker;

/// Finished work waiting for its callback on the owning thread.
pub(super) struct Completion {
    pub(super) id: TaskId,
    pub(super) state: TaskState,
    pub(super) error: Option<TaskError>,
    pub(super) deliver: Box<dyn FnOnce() + Send + 'static>,
}

/// State shared between the scheduler and its pool jobs.
pub(super) struct Shared {
    /// Tasks admitted and not yet retired by a worker. Bounded by capacity.
    pub(super) admitted: AtomicUsize,
    pub(super) in_flight: Mutex<HashMap<TaskId, Arc<TaskCell>>>,
    /// Signalled whenever a worker retires a task.
    pub(super) idle: Condvar,
    pub(super) completed: Mutex<VecDeque<Completion>>,
    pub(super) status: RwLock<StatusSnapshot>,
}

impl Shared {
    /// Drop a task from the in-flight set and release its capacity slot.
    pub(super) fn retire(&self, id: TaskId) {
        let mut in_flight = self.in_flight.lock();
        in_flight.remove(&id);
        self.admitted.fetch_sub(1, Ordering::AcqRel);
        self.idle.notify_all();
    }
}

/// Dispatches work onto a fixed-size worker pool.
///
/// Work runs off the owning thread. Its completion callback is queued and
/// only invoked by [`tick`](Self::tick) (or [`dispose`](Self::dispose)) on
/// the owning thread, in the order the work finished.
pub struct ParallelScheduler {
    pub(super) config: ParallelConfig,
    pub(super) workers: usize,
    pub(super) ids: IdSequence,
    pub(super) shared: Arc<Shared>,
    /// `None` once disposed. Submissions take this lock so none can slip in
    /// after dispose has stopped accepting.
    pub(super) pool: Mutex<Option<rayon::ThreadPool>>,
    pub(super) disposed: AtomicBool,
    /// Set while completion callbacks are being delivered.
    pub(super) delivering: AtomicBool,
    pub(super) owner: OwnerThread,
    pub(super) shutdown: ShutdownSignal,
}

impl ParallelScheduler {
    pub fn new(config: ParallelConfig, shutdown: ShutdownSignal) -> SchedulerResult<Self> {
        let workers = config.resolved_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("nucleor-worker-{i}"))
            .build()
            .map_err(|e| SchedulerError::PoolStart(e.to_string()))?;

        info!(
            workers,
            capacity = config.queue_capacity,
            "parallel scheduler started"
        );

        Ok(Self {
            config,
            workers,
            ids: IdSequence::new(),
            shared: Arc::new(Shared {
                admitted: AtomicUsize::new(0),
                in_flight: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
                completed: Mutex::new(VecDeque::new()),
                status: RwLock::new(StatusSnapshot::default()),
            }),
            pool: Mutex::new(Some(pool)),
            disposed: AtomicBool::new(false),
            delivering: AtomicBool::new(false),
            owner: OwnerThread::new(),
            shutdown,
        })
    }

    /// Submit `work` to the pool from any thread.
    ///
    /// `on_complete` always receives the outcome (including failures and
    /// panics) on the owning thread during a later tick, unless the task is
    /// cancelled before it starts.
    pub fn schedule<T, W, C>(&self, work: W, on_complete: C) -> SchedulerResult<TaskHandle>
    where
        T: Send + 'static,
        W: FnOnce(&CancelToken) -> TaskResult<T> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.shutdown.ensure_open()?;

        let pool = self.pool.lock();
        let Some(pool) = pool.as_ref() else {
            return Err(SchedulerError::ShuttingDown);
        };

        let capacity = self.config.queue_capacity;
        self.shared
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| SchedulerError::Saturated { capacity })?;

        let id = self.ids.next();
        let cell = TaskCell::new();
        self.shared.in_flight.lock().insert(id, Arc::clone(&cell));
        self.shared.status.write().on_scheduled();

        let shared = Arc::clone(&self.shared);
        let token = CancelToken::new(Arc::clone(&cell), self.shutdown.clone());
        pool.spawn_fifo(move || worker::execute(&shared, id, token, work, on_complete));

        debug!(task = %id, "parallel task scheduled");
        Ok(TaskHandle::new(id, cell))
    }

    /// Cancel before start: `true`, and the work never runs. Once running,
    /// the work's cancellation flag is raised and `false` is returned.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let cell = handle.cell();
        match cell.transition(TaskState::Pending, TaskState::Cancelled) {
            Ok(()) => {
                self.shared.status.write().on_cancelled_pending(1);
                debug!(task = %handle.id(), "parallel task cancelled before start");
                true
            }
            Err(TaskState::Running) => {
                cell.request_cancel();
                debug!(task = %handle.id(), "cancellation requested for running task");
                false
            }
            Err(_) => false,
        }
    }

    /// Cancel every task that has not started yet. Running work is left alone.
    pub fn clear(&self) -> usize {
        let cancelled = {
            let in_flight = self.shared.in_flight.lock();
            in_flight
                .values()
                .filter(|cell| {
                    cell.transition(TaskState::Pending, TaskState::Cancelled)
                        .is_ok()
                })
                .count()
        };
        self.shared.status.write().on_cancelled_pending(cancelled);
        if cancelled > 0 {
            info!(cancelled, "parallel scheduler cleared");
        }
        cancelled
    }

    /// Deliver queued completion callbacks on the owning thread, in the order
    /// the work finished. A callback that ticks again gets `Err(Reentrant)`.
    pub fn tick(&self) -> SchedulerResult<TickReport> {
        self.owner.check("tick")?;
        let _guard = TickGuard::enter(&self.delivering, "tick")?;
        let started = Instant::now();
        let mut report = self.deliver_completed();
        report.duration = started.elapsed();
        self.shared.status.write().record_tick(report.duration);

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                delivered = report.executed,
                "parallel tick had failures"
            );
        }
        Ok(report)
    }

    /// Swap the completion queue out and run every callback in it.
    pub(super) fn deliver_completed(&self) -> TickReport {
        let batch = std::mem::take(&mut *self.shared.completed.lock());
        let mut report = TickReport::default();

        for completion in batch {
            let Completion {
                id,
                state,
                error,
                deliver,
            } = completion;
            let callback = run_isolated(|| {
                deliver();
                Ok(())
            });
            report.executed += 1;
            self.shared.status.write().on_delivered(state);

            if let Some(e) = error {
                warn!(task = %id, error = %e, "parallel task failed");
                report.record_failure(SchedulerError::TaskFailed { id, source: e });
            }
            if let Err(e) = callback {
                warn!(task = %id, error = %e, "completion callback panicked");
                report.record_failure(SchedulerError::TaskFailed { id, source: e });
            }
        }
        report
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.status.read().clone()
    }

    pub fn log_status(&self) {
        self.status().log("parallel");
    }

    pub fn worker_threads(&self) -> usize {
        self.workers
    }

    /// Tasks admitted and not yet retired by a worker.
    pub fn in_flight(&self) -> usize {
        self.shared.admitted.load(Ordering::Acquire)
    }
}

impl Drop for ParallelScheduler {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pool = self.pool.lock().take();
        let cancelled = self.clear();
        drop(pool);
        debug!(cancelled, "parallel scheduler dropped without dispose");
    }
}

impl std::fmt::Debug for ParallelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelScheduler")
            .field("workers", &self.workers)
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
