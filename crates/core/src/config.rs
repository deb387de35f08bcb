use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Construction-time settings for the driver and its schedulers.
///
/// Parsed from `nucleor.toml`; every key can be overridden through
/// `NUCLEOR_{SECTION}_{KEY}` environment variables. Immutable once a driver
/// has been built from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NucleorConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub sequential: SequentialConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

// ── Section configs ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Length of one fixed step in milliseconds.
    #[serde(default = "default_fixed_timestep_ms")]
    pub fixed_timestep_ms: u64,
    /// Upper bound on fixed steps run to catch up within one frame.
    #[serde(default = "default_max_fixed_steps")]
    pub max_fixed_steps_per_frame: u32,
    /// Lerp factor applied to the smoothed frame delta (0..=1).
    #[serde(default = "default_delta_smoothing")]
    pub delta_smoothing: f64,
}

fn default_fixed_timestep_ms() -> u64 {
    20
}

fn default_max_fixed_steps() -> u32 {
    5
}

fn default_delta_smoothing() -> f64 {
    0.5
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fixed_timestep_ms: default_fixed_timestep_ms(),
            max_fixed_steps_per_frame: default_max_fixed_steps(),
            delta_smoothing: default_delta_smoothing(),
        }
    }
}

impl DriverConfig {
    pub fn fixed_timestep(&self) -> Duration {
        Duration::from_millis(self.fixed_timestep_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequentialConfig {
    /// Maximum tasks executed per tick. `None` = drain the whole generation.
    #[serde(default)]
    pub tick_budget: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    /// Maximum tasks queued or running before submissions are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long dispose waits for in-flight work before abandoning it.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ParallelConfig {
    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Number of independently locked chains posts are spread across.
    #[serde(default = "default_lock_shards")]
    pub lock_shards: usize,
}

fn default_lock_shards() -> usize {
    1
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            lock_shards: default_lock_shards(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────

impl NucleorConfig {
    /// Parse config from a TOML string, apply env overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `NUCLEOR_SECTION_KEY` overrides `section.key`.
    /// Unparseable values are ignored.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("NUCLEOR_DRIVER_FIXED_TIMESTEP_MS") {
            self.driver.fixed_timestep_ms = v;
        }
        if let Some(v) = env_parse("NUCLEOR_DRIVER_MAX_FIXED_STEPS_PER_FRAME") {
            self.driver.max_fixed_steps_per_frame = v;
        }
        if let Some(v) = env_parse("NUCLEOR_DRIVER_DELTA_SMOOTHING") {
            self.driver.delta_smoothing = v;
        }
        if let Some(v) = env_parse("NUCLEOR_SEQUENTIAL_TICK_BUDGET") {
            self.sequential.tick_budget = Some(v);
        }
        if let Some(v) = env_parse("NUCLEOR_PARALLEL_WORKER_THREADS") {
            self.parallel.worker_threads = v;
        }
        if let Some(v) = env_parse("NUCLEOR_PARALLEL_QUEUE_CAPACITY") {
            self.parallel.queue_capacity = v;
        }
        if let Some(v) = env_parse("NUCLEOR_PARALLEL_SHUTDOWN_TIMEOUT_MS") {
            self.parallel.shutdown_timeout_ms = v;
        }
        if let Some(v) = env_parse("NUCLEOR_MAILBOX_LOCK_SHARDS") {
            self.mailbox.lock_shards = v;
        }
    }

    /// Reject settings no scheduler can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.fixed_timestep_ms == 0 {
            return Err(ConfigError::Invalid(
                "driver.fixed_timestep_ms must be greater than 0".into(),
            ));
        }
        if self.driver.max_fixed_steps_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "driver.max_fixed_steps_per_frame must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.driver.delta_smoothing) {
            return Err(ConfigError::Invalid(format!(
                "driver.delta_smoothing must be within 0..=1, got {}",
                self.driver.delta_smoothing
            )));
        }
        if self.sequential.tick_budget == Some(0) {
            return Err(ConfigError::Invalid(
                "sequential.tick_budget must be greater than 0 when set".into(),
            ));
        }
        if self.parallel.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "parallel.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.mailbox.lock_shards == 0 {
            return Err(ConfigError::Invalid(
                "mailbox.lock_shards must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  driver:      fixed_timestep={}ms, max_fixed_steps={}, smoothing={}",
            self.driver.fixed_timestep_ms,
            self.driver.max_fixed_steps_per_frame,
            self.driver.delta_smoothing
        );
        tracing::info!(
            "  sequential:  tick_budget={}",
            self.sequential
                .tick_budget
                .map(|b| b.to_string())
                .unwrap_or_else(|| "(unbounded)".into())
        );
        tracing::info!(
            "  parallel:    workers={}, capacity={}, shutdown_timeout={}ms",
            self.parallel.resolved_worker_threads(),
            self.parallel.queue_capacity,
            self.parallel.shutdown_timeout_ms
        );
        tracing::info!("  mailbox:     lock_shards={}", self.mailbox.lock_shards);
    }
}
