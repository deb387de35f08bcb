use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use chrono::{DateTime, Utc};
use nucleor_core::{
    IdSequence, OwnerThread, SchedulerError, SchedulerResult, ShutdownSignal, TaskCell, TaskError,
    TaskHandle, TaskId, TaskResult, TaskState, TickCounter, run_isolated,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::guard::TickGuard;
use crate::status::TickReport;

use super::entry::{Callback, CronEntry};
use super::rule::{Due, RecurrenceRule};

/// A registration that came due this tick.
struct Firing {
    id: TaskId,
    cell: Arc<TaskCell>,
    action: Callback,
    last: bool,
}

/// Recurring-trigger scheduler.
///
/// Each registration carries a [`RecurrenceRule`]. Every tick, each due
/// registration is rescheduled first, then its callback runs on the owning
/// thread. A rule that fell several fire points behind fires once.
pub struct CronGod {
    ids: IdSequence,
    entries: Mutex<BTreeMap<TaskId, CronEntry>>,
    ticks: TickCounter,
    ticking: AtomicBool,
    owner: OwnerThread,
    shutdown: ShutdownSignal,
}

impl CronGod {
    pub fn new(ticks: TickCounter, shutdown: ShutdownSignal) -> Self {
        Self {
            ids: IdSequence::new(),
            entries: Mutex::new(BTreeMap::new()),
            ticks,
            ticking: AtomicBool::new(false),
            owner: OwnerThread::new(),
            shutdown,
        }
    }

    /// Register `action` under `rule`. Callable from any thread, including
    /// from inside a firing callback; the new entry is first evaluated on the
    /// next tick.
    pub fn register<F>(&self, rule: RecurrenceRule, action: F) -> SchedulerResult<TaskHandle>
    where
        F: FnMut() -> TaskResult<()> + Send + 'static,
    {
        self.shutdown.ensure_open()?;
        if rule.remaining == Some(0) {
            return Err(SchedulerError::InvalidRule("rule allows zero firings".into()));
        }

        let next = rule.first_due(self.ticks.current(), Utc::now())?;
        let cell = TaskCell::new();
        let id = {
            let mut entries = self.entries.lock();
            let id = self.ids.next();
            entries.insert(
                id,
                CronEntry {
                    rule,
                    next,
                    cell: Arc::clone(&cell),
                    action: Some(Box::new(action)),
                },
            );
            id
        };

        debug!(task = %id, ?next, "cron task registered");
        Ok(TaskHandle::new(id, cell))
    }

    /// Evaluate every registration against the current frame count and
    /// wall clock.
    pub fn tick(&self) -> SchedulerResult<TickReport> {
        self.tick_at(Utc::now())
    }

    /// [`tick`](Self::tick) against an explicit wall-clock instant.
    pub fn tick_at(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        self.owner.check("tick")?;
        let _guard = TickGuard::enter(&self.ticking, "tick")?;
        let started = Instant::now();
        let frame = self.ticks.current();

        let firings = self.collect_due(frame, now);
        let mut report = TickReport::default();

        for Firing {
            id,
            cell,
            mut action,
            last,
        } in firings
        {
            if cell.transition(TaskState::Pending, TaskState::Running).is_err() {
                report.skipped += 1;
                continue;
            }
            let result = run_isolated(|| action());
            report.executed += 1;

            let keep = !last && self.restore(id, action);
            let end = if cell.cancel_requested() {
                TaskState::Cancelled
            } else if keep {
                TaskState::Pending
            } else {
                match &result {
                    Ok(()) => TaskState::Completed,
                    Err(TaskError::Cancelled) => TaskState::Cancelled,
                    Err(_) => TaskState::Failed,
                }
            };
            let _ = cell.transition(TaskState::Running, end);

            if let Err(e) = result {
                if !matches!(e, TaskError::Cancelled) {
                    warn!(task = %id, error = %e, "cron task failed");
                    report.record_failure(SchedulerError::TaskFailed { id, source: e });
                }
            }
        }

        report.duration = started.elapsed();
        if report.failed > 0 {
            warn!(failed = report.failed, frame, "cron tick had failures");
        } else if report.executed > 0 {
            debug!(executed = report.executed, frame, "cron tick");
        }
        Ok(report)
    }

    /// Reschedule every due entry and take its callback out, under the lock.
    fn collect_due(&self, frame: u64, now: DateTime<Utc>) -> Vec<Firing> {
        let mut entries = self.entries.lock();
        let mut firings = Vec::new();

        for (id, entry) in entries.iter_mut() {
            if !entry.next.is_due(frame, now) {
                continue;
            }
            let Some(action) = entry.action.take() else {
                continue;
            };
            let last = entry.fire(frame, now);
            firings.push(Firing {
                id: *id,
                cell: Arc::clone(&entry.cell),
                action,
                last,
            });
        }

        for firing in firings.iter().filter(|f| f.last) {
            entries.remove(&firing.id);
        }
        firings
    }

    /// Put a callback back after it ran. `false` if the entry was cancelled
    /// in the meantime.
    fn restore(&self, id: TaskId, action: Callback) -> bool {
        match self.entries.lock().get_mut(&id) {
            Some(entry) => {
                entry.action = Some(action);
                true
            }
            None => false,
        }
    }

    /// Retire a registration. Idempotent: `true` only for the call that
    /// removed it. A callback already running finishes, then the entry ends
    /// as Cancelled.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let removed = self.entries.lock().remove(&handle.id()).is_some();
        if removed {
            let cell = handle.cell();
            if cell
                .transition(TaskState::Pending, TaskState::Cancelled)
                .is_err()
            {
                cell.request_cancel();
            }
            debug!(task = %handle.id(), "cron task cancelled");
        }
        removed
    }

    /// Retire every registration without firing it.
    pub fn dispose(&self) -> usize {
        let retired = std::mem::take(&mut *self.entries.lock());
        for entry in retired.values() {
            if entry
                .cell
                .transition(TaskState::Pending, TaskState::Cancelled)
                .is_err()
            {
                entry.cell.request_cancel();
            }
        }
        info!(retired = retired.len(), "cron scheduler disposed");
        retired.len()
    }

    /// Next due point of a live registration.
    pub fn next_fire(&self, handle: &TaskHandle) -> Option<Due> {
        self.entries.lock().get(&handle.id()).map(|e| e.next)
    }

    /// Live registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame(&self) -> u64 {
        self.ticks.current()
    }
}

impl std::fmt::Debug for CronGod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronGod")
            .field("registrations", &self.len())
            .field("frame", &self.frame())
            .finish()
    }
}
