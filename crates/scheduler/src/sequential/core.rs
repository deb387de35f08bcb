use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nucleor_core::{
    Action, IdSequence, OwnerThread, Priority, SchedulerError, SchedulerResult, SequentialConfig,
    ShutdownSignal, TaskCell, TaskHandle, TaskId, TaskState,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::status::StatusSnapshot;

/// One queued unit of work.
pub(super) struct Entry {
    pub(super) id: TaskId,
    pub(super) priority: Priority,
    pub(super) cell: Arc<TaskCell>,
    pub(super) action: Action,
}

/// Runs deferred work on the owning thread, once per frame, in
/// priority-then-insertion order.
///
/// Producers on any thread call [`schedule`](Self::schedule); the owning
/// thread calls [`tick`](Self::tick). Tasks scheduled while a tick is running
/// belong to the next generation.
pub struct SequentialScheduler {
    pub(super) config: SequentialConfig,
    pub(super) ids: IdSequence,
    /// Next generation, appended to by producers. Ids are taken under this
    /// lock so id order equals insertion order.
    pub(super) incoming: Mutex<Vec<Entry>>,
    /// Current generation, sorted, owned by the ticking thread. Holds the
    /// leftovers when a tick budget cuts a generation short.
    pub(super) current: Mutex<VecDeque<Entry>>,
    pub(super) status: RwLock<StatusSnapshot>,
    pub(super) ticking: AtomicBool,
    pub(super) owner: OwnerThread,
    pub(super) shutdown: ShutdownSignal,
}

impl SequentialScheduler {
    pub fn new(config: SequentialConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            config,
            ids: IdSequence::new(),
            incoming: Mutex::new(Vec::new()),
            current: Mutex::new(VecDeque::new()),
            status: RwLock::new(StatusSnapshot::default()),
            ticking: AtomicBool::new(false),
            owner: OwnerThread::new(),
            shutdown,
        }
    }

    /// Enqueue at the default priority.
    pub fn schedule(&self, action: Action) -> SchedulerResult<TaskHandle> {
        self.schedule_with_priority(action, Priority::default())
    }

    /// Enqueue from any thread. Never blocks on a running tick.
    pub fn schedule_with_priority(
        &self,
        action: Action,
        priority: Priority,
    ) -> SchedulerResult<TaskHandle> {
        self.shutdown.ensure_open()?;

        let cell = TaskCell::new();
        let kind = action.kind();
        let id = {
            let mut incoming = self.incoming.lock();
            let id = self.ids.next();
            incoming.push(Entry {
                id,
                priority,
                cell: Arc::clone(&cell),
                action,
            });
            self.status.write().on_scheduled();
            id
        };

        debug!(task = %id, ?priority, kind, "sequential task scheduled");
        Ok(TaskHandle::new(id, cell))
    }

    /// Cancel a task that has not started. `false` if it already ran, is
    /// running, or was cancelled before.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        self.try_cancel(handle).is_ok()
    }

    /// Like [`cancel`](Self::cancel), but says why it did not take effect.
    pub fn try_cancel(&self, handle: &TaskHandle) -> SchedulerResult<()> {
        handle
            .cell()
            .transition(TaskState::Pending, TaskState::Cancelled)
            .map_err(|state| SchedulerError::AlreadyTerminal {
                id: handle.id(),
                state,
            })?;
        self.status.write().on_cancelled_pending(1);
        debug!(task = %handle.id(), "sequential task cancelled");
        Ok(())
    }

    /// Atomically discard every pending task. Refused while a tick is in
    /// progress, which is the only time an action can be running.
    pub fn clear(&self) -> SchedulerResult<usize> {
        if self.ticking.load(Ordering::Acquire) {
            return Err(SchedulerError::Reentrant { operation: "clear" });
        }

        let mut current = self.current.lock();
        let mut incoming = self.incoming.lock();
        let discarded = current
            .drain(..)
            .chain(incoming.drain(..))
            .filter(|e| {
                e.cell
                    .transition(TaskState::Pending, TaskState::Cancelled)
                    .is_ok()
            })
            .count();
        drop(incoming);
        drop(current);

        self.status.write().on_cancelled_pending(discarded);
        if discarded > 0 {
            info!(discarded, "sequential scheduler cleared");
        }
        Ok(discarded)
    }

    /// Discard everything on teardown.
    pub fn dispose(&self) -> SchedulerResult<usize> {
        let discarded = self.clear()?;
        self.status().log("sequential");
        Ok(discarded)
    }

    /// Read-only snapshot of counts by state.
    pub fn status(&self) -> StatusSnapshot {
        self.status.read().clone()
    }

    pub fn log_status(&self) {
        self.status().log("sequential");
    }

    /// Tasks waiting in either generation.
    pub fn len(&self) -> usize {
        self.status.read().pending
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SequentialScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialScheduler")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
