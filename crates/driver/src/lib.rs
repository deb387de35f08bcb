//! Frame-phase driver: owns the fixed/variable/late loop and ticks the
//! schedulers from the owning thread inside the frame lock.

pub mod driver;
pub mod error;
pub mod frame;
pub mod handle;
pub mod phase;
pub mod user_group;

pub use driver::{FramePhaseDriver, QuitReport};
pub use error::{DriverError, DriverResult};
pub use frame::{DriverStatus, FrameInfo, FrameReport, FrameState};
pub use handle::DriverHandle;
pub use phase::{Handler, HandlerId, Phase, PhaseHandlers};
pub use user_group::UserGroup;
