use std::time::Duration;

use nucleor_scheduler::{StatusSnapshot, TickReport};
use serde::Serialize;

/// What phase handlers and user groups see of the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameInfo {
    /// Fixed steps run since the driver was built.
    pub fixed_frame: u64,
    /// Variable steps run since the driver was built.
    pub frame: u64,
    /// Delta of the current variable step.
    pub delta: Duration,
    pub average_delta: Duration,
    pub fixed_delta: Duration,
}

/// Frame counters, guarded by the driver's frame lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameState {
    pub fixed_frames: u64,
    pub frames: u64,
    pub delta: Duration,
    /// Lerped toward each frame's delta.
    pub average_delta: Duration,
    /// Sum of all variable-step deltas.
    pub elapsed: Duration,
}

impl FrameState {
    /// Record a variable step of length `delta`.
    pub(crate) fn advance(&mut self, delta: Duration, smoothing: f64) {
        self.frames += 1;
        self.delta = delta;
        self.elapsed += delta;
        self.average_delta = if self.frames == 1 {
            delta
        } else {
            let prev = self.average_delta.as_secs_f64();
            let cur = delta.as_secs_f64();
            Duration::from_secs_f64((prev + (cur - prev) * smoothing).max(0.0))
        };
    }

    pub(crate) fn info(&self, fixed_delta: Duration) -> FrameInfo {
        FrameInfo {
            fixed_frame: self.fixed_frames,
            frame: self.frames,
            delta: self.delta,
            average_delta: self.average_delta,
            fixed_delta,
        }
    }
}

/// What one [`run_frame`](crate::FramePhaseDriver::run_frame) did.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub fixed_steps: u32,
    /// Fixed steps skipped because the frame fell too far behind.
    pub dropped_steps: u64,
    pub parallel: TickReport,
    pub sequential: TickReport,
    pub cron: TickReport,
    pub mailbox: TickReport,
}

impl FrameReport {
    /// Failures captured across all four components this frame.
    pub fn failed(&self) -> usize {
        self.parallel.failed + self.sequential.failed + self.cron.failed + self.mailbox.failed
    }
}

/// Serializable diagnostics for the whole loop.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub frame: FrameState,
    pub sequential: StatusSnapshot,
    pub parallel: StatusSnapshot,
    pub cron_registrations: usize,
    pub mailbox_pending: usize,
    pub quitting: bool,
}
