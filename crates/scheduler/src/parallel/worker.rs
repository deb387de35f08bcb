use nucleor_core::{
    CancelToken, TaskId, TaskOutcome, TaskResult, TaskState, run_isolated,
};
use tracing::debug;

use super::core::{Completion, Shared};

/// Job body run on a pool thread.
///
/// The task's cell decides who wins every race: a cancel that lands before
/// Pending -> Running suppresses the work; a forced abandon that lands before
/// Running -> terminal suppresses the callback.
pub(super) fn execute<T, W, C>(
    shared: &Shared,
    id: TaskId,
    token: CancelToken,
    work: W,
    on_complete: C,
) where
    T: Send + 'static,
    W: FnOnce(&CancelToken) -> TaskResult<T>,
    C: FnOnce(TaskOutcome<T>) + Send + 'static,
{
    let cell = token.cell();
    if cell.transition(TaskState::Pending, TaskState::Running).is_err() {
        shared.retire(id);
        return;
    }
    shared.status.write().on_started();

    let outcome = TaskOutcome::from_result(run_isolated(|| work(&token)));
    let state = outcome.state();
    let error = match &outcome {
        TaskOutcome::Failed(e) => Some(e.clone()),
        _ => None,
    };

    {
        // Transition and enqueue under one lock so dispose sees either both
        // or neither.
        let mut completed = shared.completed.lock();
        if cell.transition(TaskState::Running, state).is_ok() {
            completed.push_back(Completion {
                id,
                state,
                error,
                deliver: Box::new(move || on_complete(outcome)),
            });
            shared.status.write().on_work_finished();
        } else {
            debug!(task = %id, "late result of abandoned task discarded");
        }
    }

    shared.retire(id);
}
