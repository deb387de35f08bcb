pub mod config;
pub mod error;
pub mod signal;
pub mod task;

pub use config::{
    DriverConfig, MailboxConfig, NucleorConfig, ParallelConfig, SequentialConfig, load_dotenv,
};
pub use error::*;
pub use signal::{OwnerThread, ShutdownSignal, TickCounter};
pub use task::{
    Action, CancelToken, IdSequence, Priority, TaskCell, TaskHandle, TaskId, TaskOutcome,
    TaskState, run_isolated,
};
