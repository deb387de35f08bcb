use std::sync::atomic::Ordering;
use std::time::Duration;

use nucleor_core::{SchedulerError, SchedulerResult, TaskId, TaskState};
use serde::Serialize;
use tracing::{info, warn};

use crate::guard::TickGuard;

use super::ParallelScheduler;

/// What [`ParallelScheduler::dispose`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisposeReport {
    /// Completion callbacks fired during dispose.
    pub delivered: usize,
    /// Callbacks among those that reported a failed task or panicked.
    pub failed: usize,
    /// Not-yet-started tasks cancelled.
    pub cancelled: usize,
    /// Tasks still running when the timeout expired, in id order.
    pub abandoned: Vec<TaskId>,
    pub timeout: Duration,
}

impl DisposeReport {
    /// One [`SchedulerError::ForcedAbandon`] per abandoned task.
    pub fn errors(&self) -> impl Iterator<Item = SchedulerError> + '_ {
        self.abandoned.iter().map(|&id| SchedulerError::ForcedAbandon {
            id,
            timeout: self.timeout,
        })
    }
}

impl ParallelScheduler {
    /// Stop accepting work, cancel what has not started, wait up to the
    /// configured shutdown timeout for running work, then fire the callbacks
    /// of everything that finished and abandon the rest.
    ///
    /// Owning thread only, and not from inside a completion callback. A
    /// second call is a no-op.
    pub fn dispose(&self) -> SchedulerResult<DisposeReport> {
        self.owner.check("dispose")?;
        let _guard = TickGuard::enter(&self.delivering, "dispose")?;
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(DisposeReport::default());
        }

        let pool = self.pool.lock().take();
        let timeout = self.config.shutdown_timeout();
        let mut report = DisposeReport {
            cancelled: self.clear(),
            timeout,
            ..DisposeReport::default()
        };

        {
            let mut in_flight = self.shared.in_flight.lock();
            let wait = self.shared.idle.wait_while_for(
                &mut in_flight,
                |tasks| tasks.values().any(|cell| !cell.state().is_terminal()),
                timeout,
            );

            if wait.timed_out() {
                // Hold the completion lock so no worker can finish a task
                // between our check and its abandon.
                let _completed = self.shared.completed.lock();
                for (id, cell) in in_flight.iter() {
                    if cell.transition(TaskState::Running, TaskState::Failed).is_ok() {
                        self.shared.status.write().on_abandoned();
                        warn!(task = %id, ?timeout, "task abandoned at shutdown");
                        report.abandoned.push(*id);
                    }
                }
            }
        }
        report.abandoned.sort();

        let delivered = self.deliver_completed();
        report.delivered = delivered.executed;
        report.failed = delivered.failed;

        drop(pool);
        info!(
            delivered = report.delivered,
            cancelled = report.cancelled,
            abandoned = report.abandoned.len(),
            "parallel scheduler disposed"
        );
        self.log_status();
        Ok(report)
    }
}
