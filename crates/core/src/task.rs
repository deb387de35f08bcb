//! Task identity, lifecycle state, and the closed set of action payloads
//! shared by every scheduler.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};
use crate::signal::ShutdownSignal;

// ── Identity ──────────────────────────────────────────────────

/// Opaque task identifier, unique for the lifetime of its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source owned by one scheduler.
#[derive(Debug)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> TaskId {
        TaskId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

// ── State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Cancelled => write!(f, "cancelled"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// Shared lifecycle cell. The scheduler and every [`TaskHandle`] observe the
/// same cell; all transitions are compare-and-swap so a cancel racing a start
/// has exactly one winner.
#[derive(Debug)]
pub struct TaskCell {
    state: AtomicU8,
    cancel_requested: AtomicBool,
}

impl TaskCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(TaskState::Pending as u8),
            cancel_requested: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from` -> `to`. On failure returns the state actually observed.
    pub fn transition(&self, from: TaskState, to: TaskState) -> Result<(), TaskState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TaskState::from_u8)
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

// ── Handle ────────────────────────────────────────────────────

/// Returned on scheduling; used to query or cancel the task later.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cell: Arc<TaskCell>,
}

impl TaskHandle {
    pub fn new(id: TaskId, cell: Arc<TaskCell>) -> Self {
        Self { id, cell }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }
}

/// Cooperative cancellation flag handed to cancellable work. Trips when the
/// task itself is cancelled or when the application starts quitting.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cell: Arc<TaskCell>,
    shutdown: ShutdownSignal,
}

impl CancelToken {
    pub fn new(cell: Arc<TaskCell>, shutdown: ShutdownSignal) -> Self {
        Self { cell, shutdown }
    }

    pub fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.cancel_requested() || self.shutdown.is_raised()
    }

    /// `Err(TaskError::Cancelled)` once tripped, for use with `?` in work bodies.
    pub fn check(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Priority ──────────────────────────────────────────────────

/// Execution priority. Lower numeric value = runs earlier in a tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Urgent, ahead of everything else in the generation.
    P0 = 0,
    /// High.
    P1 = 1,
    /// Normal. Tasks scheduled without an explicit priority land here.
    #[default]
    P2 = 2,
    /// Background.
    P3 = 3,
}

// ── Outcome ───────────────────────────────────────────────────

/// What a completion callback receives.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(TaskError),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn from_result(result: TaskResult<T>) -> Self {
        match result {
            Ok(v) => TaskOutcome::Completed(v),
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed(e),
        }
    }

    /// Terminal state a task with this outcome ends in.
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn value(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

// ── Actions ───────────────────────────────────────────────────

pub type Job = Box<dyn FnOnce() -> TaskResult<()> + Send + 'static>;
pub type CancellableJob = Box<dyn FnOnce(&CancelToken) -> TaskResult<()> + Send + 'static>;
pub type TaskValue = Box<dyn Any + Send>;
pub type ProduceJob = Box<dyn FnOnce() -> TaskResult<TaskValue> + Send + 'static>;
pub type DeliverJob = Box<dyn FnOnce(TaskOutcome<TaskValue>) + Send + 'static>;

/// The closed set of work payloads a scheduler can dispatch.
pub enum Action {
    /// Argument-less work.
    Plain(Job),
    /// Work that observes a [`CancelToken`].
    Cancellable(CancellableJob),
    /// Work producing a value that is handed to `deliver` on the same thread.
    Yielding {
        produce: ProduceJob,
        deliver: DeliverJob,
    },
}

impl Action {
    pub fn plain<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<()> + Send + 'static,
    {
        Action::Plain(Box::new(f))
    }

    /// Plain action that cannot fail (other than by panicking).
    pub fn infallible<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Action::Plain(Box::new(move || {
            f();
            Ok(())
        }))
    }

    pub fn cancellable<F>(f: F) -> Self
    where
        F: FnOnce(&CancelToken) -> TaskResult<()> + Send + 'static,
    {
        Action::Cancellable(Box::new(f))
    }

    pub fn yielding<T, P, D>(produce: P, deliver: D) -> Self
    where
        T: Send + 'static,
        P: FnOnce() -> TaskResult<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        Action::Yielding {
            produce: Box::new(move || produce().map(|v| Box::new(v) as TaskValue)),
            deliver: Box::new(move |outcome| {
                let typed = match outcome {
                    TaskOutcome::Completed(v) => match v.downcast::<T>() {
                        Ok(v) => TaskOutcome::Completed(*v),
                        Err(_) => TaskOutcome::Failed(TaskError::failed("result type mismatch")),
                    },
                    TaskOutcome::Failed(e) => TaskOutcome::Failed(e),
                    TaskOutcome::Cancelled => TaskOutcome::Cancelled,
                };
                deliver(typed)
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Plain(_) => "plain",
            Action::Cancellable(_) => "cancellable",
            Action::Yielding { .. } => "yielding",
        }
    }

    /// Execute synchronously on the calling thread.
    ///
    /// A yielding action always gets its `deliver` call, even when `produce`
    /// panics; a panic inside `deliver` itself propagates to the caller.
    pub fn run(self, token: &CancelToken) -> TaskResult<()> {
        match self {
            Action::Plain(job) => job(),
            Action::Cancellable(job) => {
                token.check()?;
                job(token)
            }
            Action::Yielding { produce, deliver } => {
                let produced = catch_unwind(AssertUnwindSafe(produce))
                    .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
                let result = produced.as_ref().map(|_| ()).map_err(Clone::clone);
                deliver(TaskOutcome::from_result(produced));
                result
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action::{}", self.kind())
    }
}

/// Run `f`, turning a panic into [`TaskError::Panicked`].
pub fn run_isolated<T>(f: impl FnOnce() -> TaskResult<T>) -> TaskResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn token() -> CancelToken {
        CancelToken::new(TaskCell::new(), ShutdownSignal::new())
    }

    #[test]
    fn cell_transitions_are_exclusive() {
        let cell = TaskCell::new();
        assert!(cell.transition(TaskState::Pending, TaskState::Running).is_ok());
        assert_eq!(
            cell.transition(TaskState::Pending, TaskState::Cancelled),
            Err(TaskState::Running)
        );
        assert_eq!(cell.state(), TaskState::Running);
    }

    #[test]
    fn id_sequence_is_monotonic() {
        let seq = IdSequence::new();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a);
        assert_eq!(a.to_string(), "#1");
    }

    #[test]
    fn priority_ordering_and_default() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P2 < Priority::P3);
        assert_eq!(Priority::default(), Priority::P2);
    }

    #[test]
    fn cancellable_short_circuits_when_tripped() {
        let t = token();
        t.cell.request_cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = Action::cancellable(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .run(&t);
        assert_eq!(result, Err(TaskError::Cancelled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn yielding_delivers_typed_value() {
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        let result = Action::yielding(|| Ok(41 + 1), move |out: TaskOutcome<i32>| {
            *sink.lock().unwrap() = out.value();
        })
        .run(&token());
        assert!(result.is_ok());
        assert_eq!(*got.lock().unwrap(), Some(42));
    }

    #[test]
    fn yielding_delivers_failure_on_panic() {
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        let result = Action::yielding(
            || -> TaskResult<i32> { panic!("produce exploded") },
            move |out: TaskOutcome<i32>| {
                *sink.lock().unwrap() = Some(out.state());
            },
        )
        .run(&token());
        assert!(matches!(result, Err(TaskError::Panicked(_))));
        assert_eq!(*got.lock().unwrap(), Some(TaskState::Failed));
    }

    #[test]
    fn run_isolated_catches_panics() {
        let r: TaskResult<()> = run_isolated(|| panic!("nope"));
        assert_eq!(r, Err(TaskError::Panicked("nope".into())));
    }

    #[test]
    fn outcome_from_cancelled_error() {
        let out: TaskOutcome<()> = TaskOutcome::from_result(Err(TaskError::Cancelled));
        assert_eq!(out, TaskOutcome::Cancelled);
        assert_eq!(out.state(), TaskState::Cancelled);
    }
}
