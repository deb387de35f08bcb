//! nucleor-loop: headless fixed-rate loop exercising every scheduler.
//!
//! Producer threads feed the sequential, parallel, recurring and mailbox
//! components while the main thread drives frames. After the requested number
//! of frames the loop quits and prints the final status.
//!
//! # Usage
//!
//! ```bash
//! nucleor-loop --frames 600 --producers 4
//! nucleor-loop --config nucleor.toml --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use nucleor_core::{Action, NucleorConfig, Priority, SchedulerError, TaskOutcome, load_dotenv};
use nucleor_driver::{DriverHandle, FrameInfo, FramePhaseDriver, Phase, UserGroup};
use nucleor_scheduler::RecurrenceRule;

// ── CLI ─────────────────────────────────────────────────────────────

/// Headless frame loop driving the NUCLEOR schedulers.
#[derive(Parser, Debug)]
#[command(name = "nucleor-loop", version, about)]
struct Cli {
    /// Path to nucleor.toml. Defaults plus NUCLEOR_* overrides when absent.
    #[arg(long, env = "NUCLEOR_CONFIG")]
    config: Option<PathBuf>,

    /// Number of frames to run before quitting.
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Simulated variable-step length in milliseconds.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Number of producer threads.
    #[arg(long, default_value_t = 2)]
    producers: usize,

    /// Sleep between frames so the loop runs in wall-clock time.
    #[arg(long)]
    realtime: bool,

    /// Print the final status as JSON.
    #[arg(long)]
    json: bool,
}

// ── Heartbeat user group ────────────────────────────────────────────

/// Counts variable steps and logs every few seconds of simulated time.
struct Heartbeat {
    updates: u64,
    last_log: Duration,
    elapsed: Duration,
}

impl UserGroup for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn awake(&mut self) {
        self.updates = 0;
        self.elapsed = Duration::ZERO;
        self.last_log = Duration::ZERO;
    }

    fn update(&mut self, frame: &FrameInfo) {
        self.updates += 1;
        self.elapsed += frame.delta;
        if self.elapsed - self.last_log >= Duration::from_secs(2) {
            self.last_log = self.elapsed;
            info!(
                frame = frame.frame,
                fixed_frame = frame.fixed_frame,
                avg_delta_ms = frame.average_delta.as_secs_f64() * 1000.0,
                "heartbeat"
            );
        }
    }

    fn clear(&mut self) {
        info!(updates = self.updates, "heartbeat cleared");
    }
}

// ── Producers ───────────────────────────────────────────────────────

/// Feed all four components until the driver starts quitting.
fn produce(id: usize, handle: DriverHandle, done: Arc<AtomicU64>) {
    let mut n: u64 = 0;
    loop {
        let priority = match n % 4 {
            0 => Priority::P0,
            1 => Priority::P1,
            2 => Priority::P2,
            _ => Priority::P3,
        };
        let counter = Arc::clone(&done);
        let sequential = handle.schedule_with_priority(
            Action::infallible(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            priority,
        );

        let counter = Arc::clone(&done);
        let parallel = handle.schedule_parallel(
            move |token| {
                token.check()?;
                Ok((0..1_000u64).fold(n, |acc, x| acc.wrapping_mul(31).wrapping_add(x)))
            },
            move |outcome: TaskOutcome<u64>| {
                if outcome.is_completed() {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            },
        );

        let counter = Arc::clone(&done);
        let posted = handle.post(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        match (sequential, parallel, posted) {
            (Err(SchedulerError::ShuttingDown), _, _)
            | (_, Err(SchedulerError::ShuttingDown), _)
            | (_, _, Err(SchedulerError::ShuttingDown)) => break,
            (_, Err(SchedulerError::Saturated { .. }), _) => {
                thread::sleep(Duration::from_millis(5));
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(producer = id, error = %e, "submission failed");
            }
            _ => {}
        }

        n += 1;
        thread::sleep(Duration::from_millis(1));
    }
    info!(producer = id, submitted = n, "producer stopped");
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NucleorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NucleorConfig::from_env().context("loading config from environment")?,
    };
    config.log_summary();

    let mut driver = FramePhaseDriver::new(config).context("building frame driver")?;
    driver.add_user_group(Box::new(Heartbeat {
        updates: 0,
        last_log: Duration::ZERO,
        elapsed: Duration::ZERO,
    }));
    driver.start()?;

    let handle = driver.handle();
    let done = Arc::new(AtomicU64::new(0));

    let fixed_hits = Arc::new(AtomicU64::new(0));
    let hits = Arc::clone(&fixed_hits);
    handle.subscribe(Phase::FixedSimulation, move |_| {
        hits.fetch_add(1, Ordering::Relaxed);
    });
    handle.subscribe(Phase::StartOfFrame, |frame| {
        info!(frame = frame.frame, "first frame");
    });

    let cron_handle = Arc::clone(&done);
    handle.register_cron(RecurrenceRule::every_frames(50)?, move || {
        cron_handle.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;
    handle.register_cron(RecurrenceRule::interval(Duration::from_secs(1))?, || {
        info!("one second of wall-clock time");
        Ok(())
    })?;

    let producers: Vec<_> = (0..cli.producers)
        .map(|id| {
            let handle = handle.clone();
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name(format!("nucleor-producer-{id}"))
                .spawn(move || produce(id, handle, done))
                .context("spawning producer thread")
        })
        .collect::<anyhow::Result<_>>()?;

    let delta = Duration::from_millis(cli.frame_ms);
    let started = Instant::now();
    let mut failures = 0;
    for _ in 0..cli.frames {
        let frame_start = Instant::now();
        let report = driver.run_frame(delta)?;
        failures += report.failed();
        if cli.realtime {
            if let Some(rest) = delta.checked_sub(frame_start.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    driver.log_sequential_status();
    driver.log_parallel_status();
    let quit = driver.quit()?;
    for producer in producers {
        if producer.join().is_err() {
            warn!("producer thread panicked");
        }
    }

    info!(
        frames = cli.frames,
        wall_ms = started.elapsed().as_millis() as u64,
        executed = done.load(Ordering::Relaxed),
        fixed_steps = fixed_hits.load(Ordering::Relaxed),
        failures,
        "loop finished"
    );

    let status = driver.status();
    if cli.json {
        let out = serde_json::json!({ "status": status, "quit": quit });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("frames:      {}", status.frame.frames);
        println!("fixed steps: {}", status.frame.fixed_frames);
        println!(
            "avg delta:   {:.2}ms",
            status.frame.average_delta.as_secs_f64() * 1000.0
        );
        println!(
            "sequential:  completed={} failed={} cancelled={}",
            status.sequential.completed, status.sequential.failed, status.sequential.cancelled
        );
        println!(
            "parallel:    completed={} failed={} cancelled={} abandoned={}",
            status.parallel.completed,
            status.parallel.failed,
            status.parallel.cancelled,
            status.parallel.abandoned
        );
        println!(
            "quit:        sequential_discarded={} cron_retired={} mailbox_discarded={}",
            quit.sequential_discarded, quit.cron_retired, quit.mailbox_discarded
        );
    }

    Ok(())
}
