use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Scheduler-level errors, returned synchronously to the caller of
/// `schedule`/`post`/`register`/`cancel`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler saturated: {capacity} tasks already queued or running")]
    Saturated { capacity: usize },

    #[error("task {id} is already {state}")]
    AlreadyTerminal { id: TaskId, state: TaskState },

    #[error("shutting down, submission rejected")]
    ShuttingDown,

    #[error("task {id} failed: {source}")]
    TaskFailed { id: TaskId, source: TaskError },

    #[error("task {id} abandoned after shutdown timeout of {timeout:?}")]
    ForcedAbandon { id: TaskId, timeout: Duration },

    #[error("{operation} called off the owning thread")]
    NotOwningThread { operation: &'static str },

    #[error("{operation} called while a tick is in progress")]
    Reentrant { operation: &'static str },

    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("worker pool could not be started: {0}")]
    PoolStart(String),
}

/// Failure captured into a single task's terminal state. Never aborts a tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    /// Convert a `catch_unwind` payload into a task error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(msg)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
pub type TaskResult<T> = Result<T, TaskError>;
