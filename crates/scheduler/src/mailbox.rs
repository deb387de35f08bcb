//! [`MainThreadMailbox`]: "next time the owning thread is free, run this".
//!
//! Any thread may [`post`](MainThreadMailbox::post); the owning thread calls
//! [`drain_once`](MainThreadMailbox::drain_once) once per tick. The drain takes
//! every chain out under the shard locks before invoking anything, so a post that
//! arrives while callbacks run lands in the next drain: never lost, never
//! fired twice, never run re-entrantly.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use nucleor_core::{
    MailboxConfig, OwnerThread, SchedulerError, SchedulerResult, ShutdownSignal, TaskId, run_isolated,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::guard::TickGuard;
use crate::status::TickReport;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Posted {
    /// Post sequence number, starting at 1.
    seq: u64,
    callback: Callback,
}

pub struct MainThreadMailbox {
    /// Lock shards. Posts rotate across them; a drain merges them back into
    /// append order by sequence number.
    shards: Vec<Mutex<Vec<Posted>>>,
    seq: AtomicU64,
    next_shard: AtomicUsize,
    draining: AtomicBool,
    owner: OwnerThread,
    shutdown: ShutdownSignal,
}

impl MainThreadMailbox {
    pub fn new(config: &MailboxConfig, shutdown: ShutdownSignal) -> Self {
        let shards = (0..config.lock_shards.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            shards,
            seq: AtomicU64::new(1),
            next_shard: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            owner: OwnerThread::new(),
            shutdown,
        }
    }

    /// Queue `callback` for the next drain. Callable from any thread.
    pub fn post<F>(&self, callback: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown.ensure_open()?;

        let shard = if self.shards.len() == 1 {
            0
        } else {
            self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len()
        };
        let mut chain = self.shards[shard].lock();
        // Sequence taken under the shard lock so one shard stays sorted.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        chain.push(Posted {
            seq,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Run everything posted before this call, in append order.
    ///
    /// A callback that calls `drain_once` again gets `Err(Reentrant)`. A
    /// panicking callback is reported as [`SchedulerError::TaskFailed`] whose
    /// id is the post's sequence number.
    pub fn drain_once(&self) -> SchedulerResult<TickReport> {
        self.owner.check("drain_once")?;
        let _guard = TickGuard::enter(&self.draining, "drain_once")?;
        let started = Instant::now();

        // All shards held at once: a later post from one producer can never
        // make this cut while an earlier one misses it.
        let mut batch: Vec<Posted> = Vec::new();
        let mut chains: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();
        for chain in &mut chains {
            batch.append(chain);
        }
        drop(chains);
        if self.shards.len() > 1 {
            batch.sort_by_key(|p| p.seq);
        }

        let mut report = TickReport::default();
        for posted in batch {
            let callback = posted.callback;
            let result = run_isolated(|| {
                callback();
                Ok(())
            });
            report.executed += 1;
            if let Err(e) = result {
                warn!(seq = posted.seq, error = %e, "mailbox callback panicked");
                report.record_failure(SchedulerError::TaskFailed {
                    id: TaskId(posted.seq),
                    source: e,
                });
            }
        }

        report.duration = started.elapsed();
        if report.executed > 0 {
            debug!(
                executed = report.executed,
                failed = report.failed,
                "mailbox drained"
            );
        }
        Ok(report)
    }

    /// Number of callbacks waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Drop everything still queued without running it. Returns the count.
    pub fn discard(&self) -> usize {
        let dropped: usize = self
            .shards
            .iter()
            .map(|s| std::mem::take(&mut *s.lock()).len())
            .sum();
        if dropped > 0 {
            warn!(dropped, "mailbox discarded undelivered callbacks");
        }
        dropped
    }
}

impl std::fmt::Debug for MainThreadMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadMailbox")
            .field("shards", &self.shards.len())
            .field("pending", &self.pending())
            .finish()
    }
}
