//! [`FramePhaseDriver`]: owns the loop and advances every component from
//! the owning thread.
//!
//! Per frame, under the frame lock:
//! 1. fixed steps due by the accumulated time (fixed phases)
//! 2. the variable step: user groups, variable phases, then parallel ->
//!    sequential -> cron -> mailbox
//! 3. the late step (late phases)

use std::sync::Arc;
use std::time::Duration;

use nucleor_core::{NucleorConfig, ShutdownSignal, TickCounter, run_isolated};
use nucleor_scheduler::{
    CronGod, DisposeReport, MainThreadMailbox, ParallelScheduler, SequentialScheduler,
};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::DriverResult;
use crate::frame::{DriverStatus, FrameInfo, FrameReport, FrameState};
use crate::handle::{DriverHandle, DriverShared};
use crate::phase::{Phase, PhaseHandlers};
use crate::user_group::UserGroup;

/// What [`FramePhaseDriver::quit`] tore down.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuitReport {
    pub sequential_discarded: usize,
    pub parallel: DisposeReport,
    pub cron_retired: usize,
    pub mailbox_discarded: usize,
}

pub struct FramePhaseDriver {
    config: NucleorConfig,
    shared: Arc<DriverShared>,
    user_groups: Vec<Box<dyn UserGroup>>,
    /// Time owed to the fixed step.
    accumulator: Duration,
    started: bool,
    /// User groups have had `clear` called.
    groups_cleared: bool,
    /// Teardown completed.
    quit: bool,
}

impl FramePhaseDriver {
    pub fn new(config: NucleorConfig) -> DriverResult<Self> {
        config.validate()?;

        let shutdown = ShutdownSignal::new();
        let ticks = TickCounter::new();
        let shared = Arc::new(DriverShared {
            frame_lock: ReentrantMutex::new(()),
            state: Mutex::new(FrameState::default()),
            phases: PhaseHandlers::new(),
            sequential: SequentialScheduler::new(config.sequential.clone(), shutdown.clone()),
            parallel: ParallelScheduler::new(config.parallel.clone(), shutdown.clone())?,
            cron: CronGod::new(ticks.clone(), shutdown.clone()),
            mailbox: MainThreadMailbox::new(&config.mailbox, shutdown.clone()),
            ticks,
            shutdown,
        });

        info!(
            fixed_timestep_ms = config.driver.fixed_timestep_ms,
            workers = shared.parallel.worker_threads(),
            "frame driver created"
        );

        Ok(Self {
            config,
            shared,
            user_groups: Vec::new(),
            accumulator: Duration::ZERO,
            started: false,
            groups_cleared: false,
            quit: false,
        })
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &NucleorConfig {
        &self.config
    }

    /// Register a user group. Awoken immediately if the driver has started.
    pub fn add_user_group(&mut self, mut group: Box<dyn UserGroup>) {
        if self.started {
            group.awake();
        }
        debug!(group = group.name(), "user group added");
        self.user_groups.push(group);
    }

    /// (Re)initialize: drop queued sequential and parallel work left from a
    /// previous run, then awake user groups.
    pub fn start(&mut self) -> DriverResult<()> {
        let shared = Arc::clone(&self.shared);
        let _frame = shared.frame_lock.lock();

        let sequential = shared.sequential.clear()?;
        let parallel = shared.parallel.clear();
        for group in &mut self.user_groups {
            group.awake();
        }
        self.started = true;

        info!(
            sequential_cleared = sequential,
            parallel_cleared = parallel,
            user_groups = self.user_groups.len(),
            "frame driver started"
        );
        Ok(())
    }

    // ── Steps ─────────────────────────────────────────────────────

    /// One fixed step: bump the tick counter, run the fixed phases.
    pub fn fixed_step(&mut self) {
        let _frame = self.shared.frame_lock.lock();
        let info = {
            let mut state = self.shared.state.lock();
            state.fixed_frames = self.shared.ticks.advance();
            state.info(self.config.driver.fixed_timestep())
        };
        for phase in Phase::FIXED {
            self.shared.phases.invoke(phase, &info);
        }
    }

    /// One variable step of length `delta`.
    pub fn variable_step(&mut self, delta: Duration) -> DriverResult<FrameReport> {
        let shared = Arc::clone(&self.shared);
        let _frame = shared.frame_lock.lock();

        let info = {
            let mut state = shared.state.lock();
            state.advance(delta, self.config.driver.delta_smoothing);
            state.info(self.config.driver.fixed_timestep())
        };

        self.update_user_groups(&info);
        for phase in Phase::VARIABLE {
            shared.phases.invoke(phase, &info);
        }

        Ok(FrameReport {
            parallel: shared.parallel.tick()?,
            sequential: shared.sequential.tick()?,
            cron: shared.cron.tick()?,
            mailbox: shared.mailbox.drain_once()?,
            ..FrameReport::default()
        })
    }

    /// Late phases.
    pub fn late_step(&mut self) {
        let _frame = self.shared.frame_lock.lock();
        let info = self
            .shared
            .state
            .lock()
            .info(self.config.driver.fixed_timestep());
        for phase in Phase::LATE {
            self.shared.phases.invoke(phase, &info);
        }
    }

    /// A whole frame: catch-up fixed steps, the variable step, the late step.
    ///
    /// At most `max_fixed_steps_per_frame` fixed steps run; any further
    /// backlog is dropped.
    pub fn run_frame(&mut self, delta: Duration) -> DriverResult<FrameReport> {
        let shared = Arc::clone(&self.shared);
        let _frame = shared.frame_lock.lock();

        let step = self.config.driver.fixed_timestep();
        let max_steps = self.config.driver.max_fixed_steps_per_frame;
        self.accumulator += delta;

        let mut fixed_steps = 0;
        while self.accumulator >= step && fixed_steps < max_steps {
            self.fixed_step();
            self.accumulator -= step;
            fixed_steps += 1;
        }

        let mut dropped_steps = 0;
        if self.accumulator >= step {
            let owed = self.accumulator.as_nanos();
            let step_nanos = step.as_nanos();
            dropped_steps = (owed / step_nanos) as u64;
            self.accumulator = Duration::from_nanos((owed % step_nanos) as u64);
            debug!(dropped_steps, "fixed-step backlog dropped");
        }

        let mut report = self.variable_step(delta)?;
        self.late_step();

        report.fixed_steps = fixed_steps;
        report.dropped_steps = dropped_steps;
        Ok(report)
    }

    fn update_user_groups(&mut self, info: &FrameInfo) {
        for group in &mut self.user_groups {
            if let Err(e) = run_isolated(|| {
                group.update(info);
                Ok(())
            }) {
                warn!(group = group.name(), error = %e, "user group update panicked");
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────

    /// Raise the shutdown signal, clear user groups, and dispose every
    /// scheduler. Owning thread only.
    ///
    /// Every teardown step runs even when an earlier one fails; the first
    /// failure is returned and the driver stays unquit, so a later call on
    /// the owning thread finishes the job. Once a call succeeds, further
    /// calls are no-ops.
    pub fn quit(&mut self) -> DriverResult<QuitReport> {
        if self.quit {
            return Ok(QuitReport::default());
        }
        self.shared.shutdown.raise();

        let shared = Arc::clone(&self.shared);
        let _frame = shared.frame_lock.lock();

        if !self.groups_cleared {
            for group in &mut self.user_groups {
                group.clear();
            }
            self.groups_cleared = true;
        }

        let sequential = shared.sequential.dispose();
        let parallel = shared.parallel.dispose();
        let cron_retired = shared.cron.dispose();
        let mailbox_discarded = shared.mailbox.discard();

        let (sequential_discarded, parallel) = match (sequential, parallel) {
            (Ok(sequential), Ok(parallel)) => (sequential, parallel),
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    error = %e,
                    cron_retired,
                    mailbox_discarded,
                    "frame driver quit incomplete"
                );
                return Err(e.into());
            }
        };

        let report = QuitReport {
            sequential_discarded,
            parallel,
            cron_retired,
            mailbox_discarded,
        };
        self.quit = true;

        info!(
            sequential_discarded = report.sequential_discarded,
            parallel_abandoned = report.parallel.abandoned.len(),
            cron_retired = report.cron_retired,
            mailbox_discarded = report.mailbox_discarded,
            "frame driver quit"
        );
        Ok(report)
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.shutdown.is_raised()
    }

    // ── Diagnostics ───────────────────────────────────────────────

    pub fn frame_state(&self) -> FrameState {
        self.handle().frame_state()
    }

    pub fn status(&self) -> DriverStatus {
        self.handle().status()
    }

    pub fn log_sequential_status(&self) {
        self.shared.sequential.log_status();
    }

    pub fn log_parallel_status(&self) {
        self.shared.parallel.log_status();
    }

    pub fn sequential(&self) -> &SequentialScheduler {
        &self.shared.sequential
    }

    pub fn parallel(&self) -> &ParallelScheduler {
        &self.shared.parallel
    }

    pub fn cron(&self) -> &CronGod {
        &self.shared.cron
    }

    pub fn mailbox(&self) -> &MainThreadMailbox {
        &self.shared.mailbox
    }
}

impl Drop for FramePhaseDriver {
    fn drop(&mut self) {
        if self.quit {
            return;
        }
        if let Err(e) = self.quit() {
            warn!(error = %e, "quit on drop failed");
        }
    }
}

impl std::fmt::Debug for FramePhaseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePhaseDriver")
            .field("user_groups", &self.user_groups.len())
            .field("started", &self.started)
            .field("quit", &self.quit)
            .finish()
    }
}
