//! Shared process-level signals: the quit flag, the fixed-step tick counter,
//! and the owning-thread binding.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crate::error::{SchedulerError, SchedulerResult};

/// "Application quitting" flag. Once raised, every component rejects new
/// submissions with [`SchedulerError::ShuttingDown`]. Never lowered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(ShuttingDown)` once raised.
    pub fn ensure_open(&self) -> SchedulerResult<()> {
        if self.is_raised() {
            Err(SchedulerError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

/// Fixed-step tick counter. Incremented once per fixed step by the driver,
/// read by frame-based recurrence rules.
#[derive(Debug, Clone, Default)]
pub struct TickCounter(Arc<AtomicU64>);

impl TickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Increment and return the new value.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Binds a component to the first thread that drives it.
#[derive(Debug, Default)]
pub struct OwnerThread(OnceLock<ThreadId>);

impl OwnerThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the current thread if unbound, otherwise verify it.
    pub fn check(&self, operation: &'static str) -> SchedulerResult<()> {
        let current = thread::current().id();
        if *self.0.get_or_init(|| current) == current {
            Ok(())
        } else {
            Err(SchedulerError::NotOwningThread { operation })
        }
    }

    pub fn is_owner(&self) -> bool {
        self.0.get().is_some_and(|id| *id == thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_rejects_after_raise() {
        let signal = ShutdownSignal::new();
        assert!(signal.ensure_open().is_ok());
        signal.clone().raise();
        assert_eq!(signal.ensure_open(), Err(SchedulerError::ShuttingDown));
    }

    #[test]
    fn tick_counter_is_shared() {
        let counter = TickCounter::new();
        let view = counter.clone();
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(view.current(), 2);
    }

    #[test]
    fn owner_thread_binds_first_caller() {
        let owner = Arc::new(OwnerThread::new());
        owner.check("tick").unwrap();
        assert!(owner.is_owner());

        let other = Arc::clone(&owner);
        let result = std::thread::spawn(move || other.check("tick"))
            .join()
            .unwrap();
        assert_eq!(
            result,
            Err(SchedulerError::NotOwningThread { operation: "tick" })
        );
    }
}
