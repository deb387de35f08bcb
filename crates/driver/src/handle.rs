use std::sync::Arc;

use nucleor_core::{
    Action, CancelToken, Priority, SchedulerResult, ShutdownSignal, TaskHandle, TaskOutcome,
    TaskResult, TickCounter,
};
use nucleor_scheduler::{
    CronGod, MainThreadMailbox, ParallelScheduler, RecurrenceRule, SequentialScheduler,
};
use parking_lot::{Mutex, ReentrantMutex};

use crate::frame::{DriverStatus, FrameInfo, FrameState};
use crate::phase::{HandlerId, Phase, PhaseHandlers};

/// Everything producers and the driver share.
pub(crate) struct DriverShared {
    /// Frame-wide lock. Held by the owning thread for the whole body of each
    /// step; re-entrant so code running inside a step can read frame state.
    pub(crate) frame_lock: ReentrantMutex<()>,
    pub(crate) state: Mutex<FrameState>,
    pub(crate) phases: PhaseHandlers,
    pub(crate) sequential: SequentialScheduler,
    pub(crate) parallel: ParallelScheduler,
    pub(crate) cron: CronGod,
    pub(crate) mailbox: MainThreadMailbox,
    pub(crate) ticks: TickCounter,
    pub(crate) shutdown: ShutdownSignal,
}

/// Cloneable, thread-safe entry point for producers.
///
/// Everything submitted through a handle executes on the driver's owning
/// thread (or, for parallel work, completes there).
#[derive(Clone)]
pub struct DriverHandle {
    pub(crate) shared: Arc<DriverShared>,
}

impl DriverHandle {
    /// Sequential work at the default priority.
    pub fn schedule(&self, action: Action) -> SchedulerResult<TaskHandle> {
        self.shared.sequential.schedule(action)
    }

    pub fn schedule_with_priority(
        &self,
        action: Action,
        priority: Priority,
    ) -> SchedulerResult<TaskHandle> {
        self.shared.sequential.schedule_with_priority(action, priority)
    }

    /// Pool work whose `on_complete` runs on the owning thread.
    pub fn schedule_parallel<T, W, C>(&self, work: W, on_complete: C) -> SchedulerResult<TaskHandle>
    where
        T: Send + 'static,
        W: FnOnce(&CancelToken) -> TaskResult<T> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.shared.parallel.schedule(work, on_complete)
    }

    pub fn register_cron<F>(&self, rule: RecurrenceRule, action: F) -> SchedulerResult<TaskHandle>
    where
        F: FnMut() -> TaskResult<()> + Send + 'static,
    {
        self.shared.cron.register(rule, action)
    }

    /// Run `callback` on the owning thread at the end of the next variable step.
    pub fn post<F>(&self, callback: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.mailbox.post(callback)
    }

    pub fn subscribe<F>(&self, phase: Phase, handler: F) -> HandlerId
    where
        F: FnMut(&FrameInfo) + Send + 'static,
    {
        self.shared.phases.subscribe(phase, handler)
    }

    pub fn unsubscribe(&self, phase: Phase, id: HandlerId) -> bool {
        self.shared.phases.unsubscribe(phase, id)
    }

    pub fn sequential(&self) -> &SequentialScheduler {
        &self.shared.sequential
    }

    pub fn parallel(&self) -> &ParallelScheduler {
        &self.shared.parallel
    }

    pub fn cron(&self) -> &CronGod {
        &self.shared.cron
    }

    pub fn mailbox(&self) -> &MainThreadMailbox {
        &self.shared.mailbox
    }

    /// Frame counters as of the last completed step. Waits for a step in
    /// progress on another thread to finish.
    pub fn frame_state(&self) -> FrameState {
        let _frame = self.shared.frame_lock.lock();
        self.shared.state.lock().clone()
    }

    pub fn fixed_frame(&self) -> u64 {
        self.shared.ticks.current()
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.shutdown.is_raised()
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            frame: self.frame_state(),
            sequential: self.shared.sequential.status(),
            parallel: self.shared.parallel.status(),
            cron_registrations: self.shared.cron.len(),
            mailbox_pending: self.shared.mailbox.pending(),
            quitting: self.is_quitting(),
        }
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("fixed_frame", &self.fixed_frame())
            .field("quitting", &self.is_quitting())
            .finish()
    }
}
