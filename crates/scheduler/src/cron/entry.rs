//! Per-registration scheduling state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nucleor_core::{TaskCell, TaskResult};

use super::rule::{Due, RecurrenceRule};

pub(super) type Callback = Box<dyn FnMut() -> TaskResult<()> + Send + 'static>;

pub(super) struct CronEntry {
    pub(super) rule: RecurrenceRule,
    pub(super) next: Due,
    /// Shared with the caller's handle. Pending between firings, Running
    /// while the callback runs.
    pub(super) cell: Arc<TaskCell>,
    /// Taken out while the callback runs so the map lock is not held.
    pub(super) action: Option<Callback>,
}

impl CronEntry {
    /// Consume one firing: count it down and move `next` past (`frame`, `now`).
    /// Returns `true` when this was the last firing.
    pub(super) fn fire(&mut self, frame: u64, now: DateTime<Utc>) -> bool {
        if let Some(remaining) = self.rule.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                return true;
            }
        }
        match self.rule.next_due(self.next, frame, now) {
            Some(next) => {
                self.next = next;
                false
            }
            None => true,
        }
    }
}
