//! The four per-frame components of the loop: the sequential, parallel and
//! recurring schedulers plus the owning-thread mailbox.

pub mod cron;
mod guard;
pub mod mailbox;
pub mod parallel;
pub mod sequential;
pub mod status;

pub use cron::{CronGod, Due, RecurrenceRule, RuleKind};
pub use mailbox::MainThreadMailbox;
pub use parallel::{DisposeReport, ParallelScheduler};
pub use sequential::SequentialScheduler;
pub use status::{StatusSnapshot, TickReport};
