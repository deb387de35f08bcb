use std::sync::atomic::{AtomicBool, Ordering};

use nucleor_core::{SchedulerError, SchedulerResult};

/// Marks a tick in progress; clears the flag on return or unwind.
pub(crate) struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    /// `Err(Reentrant)` if a tick is already running on this scheduler.
    pub(crate) fn enter(flag: &'a AtomicBool, operation: &'static str) -> SchedulerResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SchedulerError::Reentrant { operation })?;
        Ok(Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
