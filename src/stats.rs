use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::MAX_ERR_MESSAGES;

/// Per-set I/O accounting. `*_pending` counts requests accepted but not yet
/// terminally completed; both pendings drain to zero when the set is
/// quiescent. Totals only ever grow.
#[derive(Debug, Default)]
pub struct IoStats {
    read_total: AtomicU64,
    read_pending: AtomicU64,
    write_total: AtomicU64,
    write_pending: AtomicU64,
    suppressed: AtomicU32,
}

impl IoStats {
    pub fn read_total(&self) -> u64 {
        self.read_total.load(Ordering::Relaxed)
    }

    pub fn read_pending(&self) -> u64 {
        self.read_pending.load(Ordering::Relaxed)
    }

    pub fn write_total(&self) -> u64 {
        self.write_total.load(Ordering::Relaxed)
    }

    pub fn write_pending(&self) -> u64 {
        self.write_pending.load(Ordering::Relaxed)
    }

    /// Terminal all-dead failures logged so far; capped, never reset.
    pub fn suppressed_errors(&self) -> u32 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_read_total(&self) {
        self.read_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_read_pending(&self) {
        self.read_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_read_pending(&self) {
        self.read_pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_write_total(&self) {
        self.write_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_write_pending(&self) {
        self.write_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_write_pending(&self) {
        self.write_pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Gate for all-legs-dead operator messages: `true` while under the
    /// cap, counting the message. The counter never resets within a set's
    /// lifetime.
    pub(crate) fn note_terminal_failure(&self) -> bool {
        if self.suppressed.load(Ordering::Relaxed) < MAX_ERR_MESSAGES {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Carry the four I/O counters over from a prior instance.
    pub(crate) fn copy_from(&self, other: &IoStats) {
        self.read_total
            .store(other.read_total(), Ordering::Relaxed);
        self.read_pending
            .store(other.read_pending(), Ordering::Relaxed);
        self.write_total
            .store(other.write_total(), Ordering::Relaxed);
        self.write_pending
            .store(other.write_pending(), Ordering::Relaxed);
    }
}
