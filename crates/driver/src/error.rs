use nucleor_core::{ConfigError, SchedulerError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type DriverResult<T> = Result<T, DriverError>;
