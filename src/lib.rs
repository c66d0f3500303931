//! Synchronous block-level mirroring.
//!
//! A [`mirror::MirrorSet`] sits between an upper block-device client and a
//! set of identical underlying devices ("legs"). Every write is fanned out
//! to all live legs and acknowledged once every targeted leg completed;
//! every read is routed to a single live leg picked by the active balancing
//! policy. A leg that reports an error is excluded from all further I/O for
//! the lifetime of the set, and failed reads are re-issued to the surviving
//! legs by a per-set worker. There is no resync engine: legs are kept
//! identical purely by issuing every write to every live leg from the
//! moment the set is constructed.

pub mod config;
pub mod control;
pub mod error;
pub mod io;
pub mod leg;
pub mod mirror;
pub mod name;
pub mod policy;
pub mod registry;
mod retry;
pub mod stats;
pub mod status;

/// Maximum number of legs in a mirror set.
pub const MAX_LEGS: usize = 8;

/// Maximum length of a mirror set name, including the trailing padding.
pub const DEVNAME_MAXLEN: usize = 16;

pub const SECTOR_SHIFT: u32 = 9;
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT;

/// Unit of the data-check commands. Larger block sizes are accepted on the
/// control interface but the comparison still runs page by page.
pub const PAGE_SIZE: usize = 4096;

/// Per-leg error count cap; errors past the cap are recorded silently.
pub(crate) const MAX_LEG_ERRORS: u32 = 2;

/// All-legs-dead messages are suppressed after this many per set.
pub(crate) const MAX_ERR_MESSAGES: u32 = 20;

/// Reads served by the round-robin cursor leg before advancing.
pub(crate) const DEFAULT_RR_QUANTUM: u32 = 8;

/// Default logical-partition stripe, in KiB.
pub(crate) const DEFAULT_LP_CHUNK_KIB: u32 = 1024;
