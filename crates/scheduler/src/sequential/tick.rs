use std::sync::Arc;
use std::time::Instant;

use nucleor_core::{
    CancelToken, SchedulerError, SchedulerResult, TaskError, TaskState, run_isolated,
};
use tracing::{debug, warn};

use crate::guard::TickGuard;
use crate::status::TickReport;

use super::SequentialScheduler;

impl SequentialScheduler {
    /// Run the current generation on the owning thread.
    ///
    /// Leftovers from a budget-limited tick go first, then everything
    /// scheduled before this call in priority-then-insertion order. Anything
    /// scheduled while this runs waits for the next tick.
    pub fn tick(&self) -> SchedulerResult<TickReport> {
        self.owner.check("tick")?;
        let _guard = TickGuard::enter(&self.ticking, "tick")?;

        let started = Instant::now();
        let budget = self.config.tick_budget.unwrap_or(usize::MAX);
        let mut report = TickReport::default();
        let mut current = self.current.lock();

        let mut generation = std::mem::take(&mut *self.incoming.lock());
        generation.sort_by_key(|e| (e.priority, e.id));
        current.extend(generation);

        while report.executed < budget {
            let Some(entry) = current.pop_front() else {
                break;
            };

            if entry.cell.transition(TaskState::Pending, TaskState::Running).is_err() {
                report.skipped += 1;
                continue;
            }
            self.status.write().on_started();

            let token = CancelToken::new(Arc::clone(&entry.cell), self.shutdown.clone());
            let action = entry.action;
            let result = run_isolated(|| action.run(&token));
            report.executed += 1;

            let state = match &result {
                Ok(()) => TaskState::Completed,
                Err(TaskError::Cancelled) => TaskState::Cancelled,
                Err(_) => TaskState::Failed,
            };
            // Only this thread moves a task out of Running.
            let _ = entry.cell.transition(TaskState::Running, state);
            self.status.write().on_finished(state);

            if let Err(e) = result {
                if state == TaskState::Failed {
                    warn!(task = %entry.id, error = %e, "sequential task failed");
                    report.record_failure(SchedulerError::TaskFailed {
                        id: entry.id,
                        source: e,
                    });
                }
            }
        }

        report.deferred = current.len();
        drop(current);

        report.duration = started.elapsed();
        self.status.write().record_tick(report.duration);

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                executed = report.executed,
                "sequential tick had failures"
            );
        } else if !report.is_idle() {
            debug!(
                executed = report.executed,
                skipped = report.skipped,
                deferred = report.deferred,
                "sequential tick"
            );
        }
        Ok(report)
    }
}
