//! Sequential scheduler: ordered, budgeted execution on the owning thread.
//!
//! Split into focused submodules:
//! - `core`: struct, submission, cancellation, clearing, and status
//! - `tick`: generation handling and per-tick execution

mod core;
mod tick;

pub use self::core::SequentialScheduler;
