use std::time::Duration;

use nucleor_core::{SchedulerError, TaskState};
use serde::Serialize;

/// Read-only diagnostic snapshot of a scheduler's task counts.
///
/// `pending` and `running` are live gauges; the rest are lifetime totals so
/// every terminal task shows up at least once.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub pending: usize,
    pub running: usize,
    /// Finished work whose completion callback has not been announced yet.
    pub awaiting_callback: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub abandoned: u64,
    /// Number of ticks observed.
    pub ticks: u64,
    /// Rolling average tick duration.
    pub avg_tick_duration: Duration,
}

impl StatusSnapshot {
    pub(crate) fn on_scheduled(&mut self) {
        self.pending += 1;
    }

    pub(crate) fn on_started(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.running += 1;
    }

    pub(crate) fn on_finished(&mut self, state: TaskState) {
        self.running = self.running.saturating_sub(1);
        self.record_terminal(state);
    }

    /// Off-thread work finished; its callback waits for the next tick.
    pub(crate) fn on_work_finished(&mut self) {
        self.running = self.running.saturating_sub(1);
        self.awaiting_callback += 1;
    }

    pub(crate) fn on_delivered(&mut self, state: TaskState) {
        self.awaiting_callback = self.awaiting_callback.saturating_sub(1);
        self.record_terminal(state);
    }

    pub(crate) fn on_cancelled_pending(&mut self, count: usize) {
        self.pending = self.pending.saturating_sub(count);
        self.cancelled += count as u64;
    }

    pub(crate) fn on_abandoned(&mut self) {
        self.running = self.running.saturating_sub(1);
        self.abandoned += 1;
    }

    fn record_terminal(&mut self, state: TaskState) {
        match state {
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Pending | TaskState::Running => {}
        }
    }

    /// Record a tick.
    pub(crate) fn record_tick(&mut self, duration: Duration) {
        self.ticks += 1;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_tick_duration = if self.ticks == 1 {
            duration
        } else {
            let prev_nanos = self.avg_tick_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.ticks as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn log(&self, scheduler: &str) {
        tracing::info!(
            scheduler,
            pending = self.pending,
            running = self.running,
            awaiting_callback = self.awaiting_callback,
            completed = self.completed,
            failed = self.failed,
            cancelled = self.cancelled,
            abandoned = self.abandoned,
            ticks = self.ticks,
            avg_tick_us = self.avg_tick_duration.as_micros() as u64,
            "scheduler status"
        );
    }
}

/// What one `tick()` (or `drain_once()`) did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Actions or callbacks run to completion (successfully or not).
    pub executed: usize,
    pub failed: usize,
    /// Entries dropped without running because they were cancelled.
    pub skipped: usize,
    /// Entries left over for the next tick because of the tick budget.
    pub deferred: usize,
    /// Captured [`SchedulerError::TaskFailed`] values for this tick.
    pub failures: Vec<SchedulerError>,
    pub duration: Duration,
}

impl TickReport {
    pub(crate) fn record_failure(&mut self, failure: SchedulerError) {
        self.failed += 1;
        self.failures.push(failure);
    }

    pub fn is_idle(&self) -> bool {
        self.executed == 0 && self.skipped == 0
    }
}
