//! [`CronGod`]: recurring triggers evaluated once per tick.
//!
//! Split into focused submodules:
//! - `rule`: recurrence rules, due points, and the rule grammar
//! - `entry`: per-registration scheduling state
//! - `core`: registration, the due-check tick, cancellation, and dispose

mod core;
mod entry;
mod rule;

pub use self::core::CronGod;
pub use self::rule::{Due, RecurrenceRule, RuleKind, parse_duration};
