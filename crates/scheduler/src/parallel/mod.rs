//! Parallel scheduler: work on a fixed rayon pool, completion callbacks
//! rendezvoused back onto the owning thread.
//!
//! Split into focused submodules:
//! - `core`: struct, construction, submission, cancellation, and tick
//! - `worker`: the job body each pool thread runs
//! - `dispose`: bounded shutdown and forced abandon

mod core;
mod dispose;
mod worker;
#[cfg(test)]
mod tests;

pub use self::core::ParallelScheduler;
pub use self::dispose::DisposeReport;
