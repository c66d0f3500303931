use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::MAX_LEG_ERRORS;

bitflags::bitflags! {
    /// Per-leg fault classes. The recorder floods all bits on the first
    /// observation of any class, so a leg is excluded from reads, writes
    /// and checks uniformly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultKind: u8 {
        const WRITE = 1 << 0;
        const SYNC = 1 << 1;
        const READ = 1 << 2;
    }
}

/// One underlying device of a mirror set. Created at construction,
/// destroyed with the set. A leg carries only its own index; callbacks that
/// need the owning set carry a handle to it instead.
pub struct Leg<D> {
    dev: Arc<D>,
    offset: u64,
    idx: usize,
    error_type: AtomicU8,
    error_count: AtomicU32,
}

impl<D> Leg<D> {
    pub(crate) fn new(idx: usize, dev: Arc<D>, offset: u64) -> Self {
        Self {
            dev,
            offset,
            idx,
            error_type: AtomicU8::new(0),
            error_count: AtomicU32::new(0),
        }
    }

    pub fn dev(&self) -> &Arc<D> {
        &self.dev
    }

    /// Sector offset within the device at which the mirrored range begins.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Lock-free liveness check, callable from completion context. Becoming
    /// dead is one-way within a set's lifetime.
    pub fn is_alive(&self) -> bool {
        self.error_type.load(Ordering::Acquire) == 0 && self.error_count.load(Ordering::Acquire) == 0
    }

    pub fn fault_bits(&self) -> FaultKind {
        FaultKind::from_bits_truncate(self.error_type.load(Ordering::Acquire))
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    /// Record one fault class. Returns `false` if that class was already
    /// recorded; the first observation raises all classes at once.
    pub(crate) fn record_fault(&self, kind: FaultKind) -> bool {
        let prev = self.error_type.fetch_or(kind.bits(), Ordering::AcqRel);
        if prev & kind.bits() != 0 {
            return false;
        }
        self.error_type
            .fetch_or(FaultKind::all().bits(), Ordering::AcqRel);
        true
    }

    /// Bump the error count unless it already hit the cap; further errors
    /// stay silent. Returns `true` when the bump happened.
    pub(crate) fn bump_error_count(&self) -> bool {
        if self.error_count.load(Ordering::Acquire) < MAX_LEG_ERRORS {
            self.error_count.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}
