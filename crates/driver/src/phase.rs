//! Frame phases and their ordered handler lists.
//!
//! A handler may subscribe or unsubscribe handlers (itself included) on any
//! phase while it is being invoked. Invocation takes the list out under the
//! phase lock, runs it unlocked, then merges back whatever changed meanwhile.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nucleor_core::run_isolated;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::frame::FrameInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    // ── Fixed step ──
    FixedBodies,
    Fixed1,
    Fixed2,
    Fixed3,
    FixedSimulation,
    // ── Variable step ──
    /// One-shot: handlers are dropped after they run.
    StartOfFrame,
    Presentation,
    NetworkPull,
    Inputs,
    Update1,
    Update2,
    Update3,
    PostUpdate,
    // ── Late step ──
    LateUpdate,
    /// One-shot: handlers are dropped after they run.
    EndOfFrame,
    NetworkPush,
}

impl Phase {
    pub const COUNT: usize = 16;

    pub const FIXED: [Phase; 5] = [
        Phase::FixedBodies,
        Phase::Fixed1,
        Phase::Fixed2,
        Phase::Fixed3,
        Phase::FixedSimulation,
    ];

    pub const VARIABLE: [Phase; 8] = [
        Phase::StartOfFrame,
        Phase::Presentation,
        Phase::NetworkPull,
        Phase::Inputs,
        Phase::Update1,
        Phase::Update2,
        Phase::Update3,
        Phase::PostUpdate,
    ];

    pub const LATE: [Phase; 3] = [Phase::LateUpdate, Phase::EndOfFrame, Phase::NetworkPush];

    pub fn is_one_shot(self) -> bool {
        matches!(self, Phase::StartOfFrame | Phase::EndOfFrame)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

pub type Handler = Box<dyn FnMut(&FrameInfo) + Send + 'static>;

struct Registered {
    id: HandlerId,
    handler: Handler,
}

#[derive(Default)]
struct Slot {
    handlers: Vec<Registered>,
    /// Ids taken out for the invocation in progress.
    detached: Vec<HandlerId>,
    /// Detached ids unsubscribed during that invocation.
    dropped: Vec<HandlerId>,
}

/// Ordered handler lists, one per [`Phase`], each behind its own lock.
pub struct PhaseHandlers {
    slots: [Mutex<Slot>; Phase::COUNT],
    next_id: AtomicU64,
}

impl PhaseHandlers {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(Slot::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append `handler` to `phase`. Handlers added while `phase` is being
    /// invoked first run on its next invocation.
    pub fn subscribe<F>(&self, phase: Phase, handler: F) -> HandlerId
    where
        F: FnMut(&FrameInfo) + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots[phase.index()].lock().handlers.push(Registered {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a handler. `false` if it is not subscribed to `phase`.
    pub fn unsubscribe(&self, phase: Phase, id: HandlerId) -> bool {
        let mut slot = self.slots[phase.index()].lock();
        if let Some(pos) = slot.handlers.iter().position(|r| r.id == id) {
            slot.handlers.remove(pos);
            true
        } else if slot.detached.contains(&id) && !slot.dropped.contains(&id) {
            slot.dropped.push(id);
            true
        } else {
            false
        }
    }

    /// Run every handler of `phase` in subscription order. Returns how many ran.
    pub fn invoke(&self, phase: Phase, info: &FrameInfo) -> usize {
        let slot_lock = &self.slots[phase.index()];
        let batch = {
            let mut slot = slot_lock.lock();
            let batch = std::mem::take(&mut slot.handlers);
            slot.detached = batch.iter().map(|r| r.id).collect();
            batch
        };
        if batch.is_empty() {
            return 0;
        }

        let mut ran = 0;
        let mut kept = Vec::with_capacity(batch.len());
        for mut registered in batch {
            if slot_lock.lock().dropped.contains(&registered.id) {
                continue;
            }
            let handler = &mut registered.handler;
            if let Err(e) = run_isolated(|| {
                handler(info);
                Ok(())
            }) {
                warn!(?phase, handler = %registered.id, error = %e, "phase handler panicked");
            }
            ran += 1;
            kept.push(registered);
        }

        let mut slot = slot_lock.lock();
        let dropped = std::mem::take(&mut slot.dropped);
        slot.detached.clear();
        if !phase.is_one_shot() {
            kept.retain(|r| !dropped.contains(&r.id));
            kept.append(&mut slot.handlers);
            slot.handlers = kept;
        }
        ran
    }

    pub fn len(&self, phase: Phase) -> usize {
        self.slots[phase.index()].lock().handlers.len()
    }
}

impl Default for PhaseHandlers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn info() -> FrameInfo {
        FrameInfo::default()
    }

    #[test]
    fn phase_lists_cover_every_phase_once() {
        let all: Vec<Phase> = Phase::FIXED
            .iter()
            .chain(Phase::VARIABLE.iter())
            .chain(Phase::LATE.iter())
            .copied()
            .collect();
        assert_eq!(all.len(), Phase::COUNT);
        for (i, phase) in all.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let phases = PhaseHandlers::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let log = Arc::clone(&log);
            phases.subscribe(Phase::Update1, move |_| log.lock().push(n));
        }
        assert_eq!(phases.invoke(Phase::Update1, &info()), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn one_shot_phase_drops_handlers() {
        let phases = PhaseHandlers::new();
        phases.subscribe(Phase::StartOfFrame, |_| {});
        assert_eq!(phases.invoke(Phase::StartOfFrame, &info()), 1);
        assert_eq!(phases.invoke(Phase::StartOfFrame, &info()), 0);
        assert_eq!(phases.len(Phase::StartOfFrame), 0);
    }

    #[test]
    fn subscribe_from_inside_handler_runs_next_time() {
        let phases = Arc::new(PhaseHandlers::new());
        let hits = Arc::new(Mutex::new(0));

        let inner = Arc::clone(&phases);
        let inner_hits = Arc::clone(&hits);
        phases.subscribe(Phase::EndOfFrame, move |_| {
            let h = Arc::clone(&inner_hits);
            inner.subscribe(Phase::EndOfFrame, move |_| *h.lock() += 1);
        });

        phases.invoke(Phase::EndOfFrame, &info());
        assert_eq!(*hits.lock(), 0);
        assert_eq!(phases.len(Phase::EndOfFrame), 1);

        phases.invoke(Phase::EndOfFrame, &info());
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn handler_can_unsubscribe_itself() {
        let phases = Arc::new(PhaseHandlers::new());
        let hits = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&phases);
        let inner_hits = Arc::clone(&hits);
        let inner_id = Arc::clone(&own_id);
        let id = phases.subscribe(Phase::Inputs, move |_| {
            *inner_hits.lock() += 1;
            if let Some(id) = *inner_id.lock() {
                assert!(inner.unsubscribe(Phase::Inputs, id));
            }
        });
        *own_id.lock() = Some(id);

        phases.invoke(Phase::Inputs, &info());
        phases.invoke(Phase::Inputs, &info());
        assert_eq!(*hits.lock(), 1);
        assert!(!phases.unsubscribe(Phase::Inputs, id));
    }

    #[test]
    fn unsubscribed_sibling_is_skipped_same_pass() {
        let phases = Arc::new(PhaseHandlers::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&phases);
        let inner_victim = Arc::clone(&victim);
        phases.subscribe(Phase::Update2, move |_| {
            if let Some(id) = inner_victim.lock().take() {
                inner.unsubscribe(Phase::Update2, id);
            }
        });
        let l = Arc::clone(&log);
        let id = phases.subscribe(Phase::Update2, move |_| l.lock().push("victim"));
        *victim.lock() = Some(id);

        assert_eq!(phases.invoke(Phase::Update2, &info()), 1);
        assert!(log.lock().is_empty());
        assert_eq!(phases.len(Phase::Update2), 1);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let phases = PhaseHandlers::new();
        let hits = Arc::new(Mutex::new(0));
        phases.subscribe(Phase::LateUpdate, |_| panic!("handler blew up"));
        let h = Arc::clone(&hits);
        phases.subscribe(Phase::LateUpdate, move |_| *h.lock() += 1);

        assert_eq!(phases.invoke(Phase::LateUpdate, &info()), 2);
        assert_eq!(*hits.lock(), 1);
        assert_eq!(phases.len(Phase::LateUpdate), 2);
    }
}
