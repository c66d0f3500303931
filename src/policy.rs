//! Read balancing policies.
//!
//! All policy parameters live side by side as atomics so that switching the
//! active policy never blocks in-flight I/O, and parameters set for one
//! policy survive a switch to another. Only the round-robin cursor needs a
//! lock; it is the `choose_lock` of the set and can be taken from
//! completion context.

use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::leg::Leg;
use crate::{DEFAULT_LP_CHUNK_KIB, DEFAULT_RR_QUANTUM, MAX_LEGS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    RoundRobin,
    LogicalPartition,
    Weighted,
}

impl PolicyKind {
    fn as_u8(self) -> u8 {
        match self {
            PolicyKind::RoundRobin => 0,
            PolicyKind::LogicalPartition => 1,
            PolicyKind::Weighted => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PolicyKind::LogicalPartition,
            2 => PolicyKind::Weighted,
            _ => PolicyKind::RoundRobin,
        }
    }
}

struct RrCursor {
    leg: usize,
    remaining: u32,
}

pub struct PolicyState {
    kind: AtomicU8,
    /// Reads served per leg before the round-robin cursor advances.
    rr_quantum: AtomicU32,
    choose_lock: Mutex<RrCursor>,
    lp_chunk_kib: AtomicU32,
    weights: [AtomicU32; MAX_LEGS],
    /// Cached index of the max-weighted live leg; refreshed whenever the
    /// cached leg is found dead or a weight changes.
    max_weight_live: AtomicUsize,
}

impl PolicyState {
    pub(crate) fn new() -> Self {
        Self {
            kind: AtomicU8::new(PolicyKind::RoundRobin.as_u8()),
            rr_quantum: AtomicU32::new(DEFAULT_RR_QUANTUM),
            choose_lock: Mutex::new(RrCursor {
                leg: 0,
                remaining: DEFAULT_RR_QUANTUM,
            }),
            lp_chunk_kib: AtomicU32::new(DEFAULT_LP_CHUNK_KIB),
            weights: std::array::from_fn(|_| AtomicU32::new(0)),
            max_weight_live: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        PolicyKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    pub fn rr_quantum(&self) -> u32 {
        self.rr_quantum.load(Ordering::Acquire)
    }

    pub fn lp_chunk_kib(&self) -> u32 {
        self.lp_chunk_kib.load(Ordering::Acquire)
    }

    pub fn weight(&self, leg: usize) -> u32 {
        self.weights[leg].load(Ordering::Acquire)
    }

    pub fn max_weight_live(&self) -> usize {
        self.max_weight_live.load(Ordering::Acquire)
    }

    pub(crate) fn set_round_robin(&self, quantum: u32) {
        self.rr_quantum.store(quantum, Ordering::Release);
        self.choose_lock.lock().remaining = quantum;
        self.kind
            .store(PolicyKind::RoundRobin.as_u8(), Ordering::Release);
    }

    /// Carry the quantum over from a prior instance without switching the
    /// active policy.
    pub(crate) fn inherit_rr_quantum(&self, quantum: u32) {
        self.rr_quantum.store(quantum, Ordering::Release);
        self.choose_lock.lock().remaining = quantum;
    }

    pub(crate) fn set_logical_part(&self, chunk_kib: u32) {
        self.lp_chunk_kib.store(chunk_kib, Ordering::Release);
        self.kind
            .store(PolicyKind::LogicalPartition.as_u8(), Ordering::Release);
    }

    pub(crate) fn fill_weights(&self, weight: u32) {
        for w in &self.weights {
            w.store(weight, Ordering::Release);
        }
    }

    pub(crate) fn store_weight(&self, leg: usize, weight: u32) {
        self.weights[leg].store(weight, Ordering::Release);
    }

    /// Control-interface weight update: store and refresh the cached max.
    pub(crate) fn set_weight<D>(&self, legs: &[Leg<D>], leg: usize, weight: u32) {
        self.store_weight(leg, weight);
        self.recompute_max_live(legs);
    }

    pub(crate) fn activate_weighted<D>(&self, legs: &[Leg<D>]) {
        self.recompute_max_live(legs);
        self.kind
            .store(PolicyKind::Weighted.as_u8(), Ordering::Release);
    }

    /// Argmax of weights over the live legs, lowest index on ties. The
    /// cached index is left untouched when no leg is alive.
    pub(crate) fn recompute_max_live<D>(&self, legs: &[Leg<D>]) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, leg) in legs.iter().enumerate() {
            if !leg.is_alive() {
                continue;
            }
            let w = self.weights[i].load(Ordering::Acquire);
            match best {
                Some((_, max)) if max >= w => {}
                _ => best = Some((i, w)),
            }
        }
        if let Some((i, _)) = best {
            self.max_weight_live.store(i, Ordering::Release);
        }
        best.map(|(i, _)| i)
    }

    /// Pick a live leg for a read starting at `sector`, or `None` when every
    /// leg is dead. Callable from any context, including completions.
    pub(crate) fn choose<D>(&self, legs: &[Leg<D>], sector: u64) -> Option<usize> {
        match self.kind() {
            PolicyKind::RoundRobin => self.choose_round_robin(legs),
            PolicyKind::LogicalPartition => self.choose_logical_part(legs, sector),
            PolicyKind::Weighted => self.choose_weighted(legs),
        }
    }

    fn choose_round_robin<D>(&self, legs: &[Leg<D>]) -> Option<usize> {
        let mut rr = self.choose_lock.lock();
        let start = rr.leg;
        // Serve `quantum` reads from the cursor leg, then advance backward
        // one slot, wrapping from 0 to n-1. A dead cursor advances
        // immediately; a full revolution means no live leg.
        loop {
            let cur = rr.leg;
            if legs[cur].is_alive() {
                rr.remaining = rr.remaining.saturating_sub(1);
                if rr.remaining != 0 {
                    return Some(cur);
                }
            }
            rr.remaining = self.rr_quantum.load(Ordering::Acquire);
            rr.leg = if cur == 0 { legs.len() - 1 } else { cur - 1 };
            if rr.leg == start {
                break;
            }
        }
        let cur = rr.leg;
        legs[cur].is_alive().then_some(cur)
    }

    fn choose_logical_part<D>(&self, legs: &[Leg<D>], sector: u64) -> Option<usize> {
        // stripe chunk in KiB -> sectors
        let chunk = self.lp_chunk_kib.load(Ordering::Acquire) as u64 * 2;
        debug_assert!(chunk > 0 && chunk % 8 == 0);
        let idx = ((sector / chunk) % legs.len() as u64) as usize;
        if legs[idx].is_alive() {
            return Some(idx);
        }
        // on error, fall back to next-available-live
        next_live_backward(legs, idx)
    }

    fn choose_weighted<D>(&self, legs: &[Leg<D>]) -> Option<usize> {
        let cached = self.max_weight_live.load(Ordering::Acquire);
        if cached < legs.len() && legs[cached].is_alive() {
            return Some(cached);
        }
        self.recompute_max_live(legs)
    }
}

/// Walk backward from `start` (exclusive) with wrap-around until a live leg
/// turns up; `None` after a full revolution.
fn next_live_backward<D>(legs: &[Leg<D>], start: usize) -> Option<usize> {
    let mut cur = start;
    loop {
        cur = if cur == 0 { legs.len() - 1 } else { cur - 1 };
        if cur == start {
            return None;
        }
        if legs[cur].is_alive() {
            return Some(cur);
        }
    }
}
