//! Process-wide reconfiguration slots.
//!
//! Every live mirror set occupies one slot, keyed by its device name. When
//! the upper layer replaces a table, the successor set is constructed while
//! its predecessor still holds a slot; finding that predecessor by name is
//! what lets selected state carry over. Slots hold weak references only, so
//! the registry never keeps a set alive.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::io::Io;
use crate::mirror::MirrorSet;
use crate::name::DeviceName;

const DEFAULT_SLOTS: usize = 64;

struct Entry<I: Io> {
    name: DeviceName,
    ms: Weak<MirrorSet<I>>,
}

struct Slot<I: Io> {
    in_use: AtomicU32,
    entry: Mutex<Option<Entry<I>>>,
}

pub struct Registry<I: Io> {
    slots: Box<[Slot<I>]>,
}

impl<I: Io> Default for Registry<I> {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl<I: Io> Registry<I> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                in_use: AtomicU32::new(0),
                entry: Mutex::new(None),
            })
            .collect();
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot. Two concurrent table swaps can race for
    /// the same slot, so claiming is an increment-and-check: whoever got
    /// the count to one owns it.
    pub(crate) fn claim(&self) -> Result<usize> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.in_use.load(Ordering::Acquire) > 0 {
                continue;
            }
            if slot.in_use.fetch_add(1, Ordering::AcqRel) + 1 == 1 {
                return Ok(i);
            }
            // someone beat us into this spot
            slot.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::error!("too many mirror set instances loaded");
        Err(Error::TooManyInstances)
    }

    pub(crate) fn install(&self, slot: usize, name: DeviceName, ms: Weak<MirrorSet<I>>) {
        debug_assert!(self.slots[slot].in_use.load(Ordering::Acquire) > 0);
        *self.slots[slot].entry.lock() = Some(Entry { name, ms });
    }

    /// Another in-use slot holding a set with the same name, if any: the
    /// predecessor across a table swap.
    pub(crate) fn find_sibling(&self, own_slot: usize, name: &DeviceName) -> Option<Arc<MirrorSet<I>>> {
        for (i, slot) in self.slots.iter().enumerate() {
            if i == own_slot || slot.in_use.load(Ordering::Acquire) == 0 {
                continue;
            }
            let entry = slot.entry.lock();
            if let Some(entry) = entry.as_ref() {
                if entry.name == *name {
                    if let Some(ms) = entry.ms.upgrade() {
                        return Some(ms);
                    }
                }
            }
        }
        None
    }

    pub fn find_by_name(&self, name: &DeviceName) -> Option<Arc<MirrorSet<I>>> {
        for slot in self.slots.iter() {
            if slot.in_use.load(Ordering::Acquire) == 0 {
                continue;
            }
            let entry = slot.entry.lock();
            if let Some(entry) = entry.as_ref() {
                if entry.name == *name {
                    if let Some(ms) = entry.ms.upgrade() {
                        return Some(ms);
                    }
                }
            }
        }
        None
    }

    pub(crate) fn release(&self, slot: usize) {
        *self.slots[slot].entry.lock() = None;
        self.slots[slot].in_use.store(0, Ordering::Release);
    }
}
