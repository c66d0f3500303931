//! The mirror set: write fan-out, read dispatch, failure recording and
//! lifecycle.
//!
//! All the I/O action goes through [`MirrorSet::map`]. Writes are issued to
//! every live leg as one batch and complete upward once the whole batch
//! completed; reads go to one live leg and are re-queued to a survivor on
//! failure. Completion handlers run wherever the gateway fires them and
//! only touch atomics and the two short-lived set locks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::config::{PolicySpec, TargetParams};
use crate::error::{Error, Result};
use crate::io::{BlockDevice, Io, IoRegion, IoStatus, WriteFlags, WritePayload};
use crate::leg::{FaultKind, Leg};
use crate::name::DeviceName;
use crate::policy::PolicyState;
use crate::registry::Registry;
use crate::retry::{RetryQueue, WorkItem};
use crate::stats::IoStats;
use crate::{MAX_LEGS, SECTOR_SHIFT};

/// Sentinel for "no leg": the default-leg slot holds this exactly when
/// every leg is dead.
pub const NO_LEG: usize = usize::MAX;

const DEFAULT_LEG: usize = 0;

/// Operator notification hook, invoked from the set's worker thread when a
/// leg transitions to failed. Scheduled exactly once per transition.
pub trait EventSink: Send + Sync + 'static {
    fn leg_failed(&self, set: &DeviceName, leg: usize);
}

/// Default sink: log and move on.
pub struct LogEvents;

impl EventSink for LogEvents {
    fn leg_failed(&self, set: &DeviceName, leg: usize) {
        tracing::warn!(set = %set, leg, "mirror leg failure event");
    }
}

pub type Done = Box<dyn FnOnce(Result<Completed>) + Send + 'static>;

/// Terminal result handed to the upper layer, exactly once per request.
#[derive(Debug)]
pub enum Completed {
    Read(BytesMut),
    Write,
    Discard,
}

pub(crate) enum RequestOp {
    Read { buf: BytesMut, ahead: bool },
    Write { data: Bytes, flags: WriteFlags },
    Discard { count: u64 },
}

/// One upper-layer request. Constructed through [`Request::read`],
/// [`Request::write`] and friends so that the payload always matches the
/// operation.
pub struct Request {
    pub(crate) sector: u64,
    pub(crate) op: RequestOp,
    pub(crate) done: Done,
}

impl Request {
    pub fn read(sector: u64, count: u64, done: Done) -> Self {
        Self {
            sector,
            op: RequestOp::Read {
                buf: BytesMut::zeroed((count << SECTOR_SHIFT) as usize),
                ahead: false,
            },
            done,
        }
    }

    pub fn read_ahead(sector: u64, count: u64, done: Done) -> Self {
        Self {
            sector,
            op: RequestOp::Read {
                buf: BytesMut::zeroed((count << SECTOR_SHIFT) as usize),
                ahead: true,
            },
            done,
        }
    }

    pub fn write(sector: u64, data: Bytes, flags: WriteFlags, done: Done) -> Self {
        Self {
            sector,
            op: RequestOp::Write { data, flags },
            done,
        }
    }

    pub fn discard(sector: u64, count: u64, done: Done) -> Self {
        Self {
            sector,
            op: RequestOp::Discard { count },
            done,
        }
    }
}

/// Synchronous disposition of a [`MirrorSet::map`] call. The terminal
/// completion always arrives through the request callback as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// Queued asynchronously; the completion callback will fire later (or
    /// may already have fired inline).
    Submitted,
    /// Read-ahead rejected so the upper layer can drop it cheaply.
    WouldBlock,
    /// Rejected terminally (no live leg); completed with an error.
    Error,
}

/// Per-request scratch: everything needed to aggregate a fan-out or to
/// restore and re-issue a failed read. Allocated in `map`, consumed by the
/// terminal completion path.
pub(crate) struct MapInfo<I: Io> {
    pub(crate) ms: Arc<MirrorSet<I>>,
    pub(crate) sector: u64,
    pub(crate) count: u64,
    /// Leg a read was routed to; reassigned on retry.
    pub(crate) read_leg: usize,
    /// Legs a write was fanned out to, in issue order. The gateway error
    /// bitmap is indexed over this list, not the full leg array.
    pub(crate) write_legs: [usize; MAX_LEGS],
    pub(crate) nr_live: usize,
    pub(crate) discard: bool,
    pub(crate) done: Done,
}

pub struct MirrorSet<I: Io> {
    pub(crate) name: DeviceName,
    /// First upper-layer sector of the mirrored range.
    pub(crate) begin: u64,
    /// Length of the mirrored range in sectors.
    pub(crate) len: u64,
    pub(crate) io: I,
    pub(crate) legs: Box<[Leg<I::Device>]>,
    /// Index of the default leg, or [`NO_LEG`] once every leg is dead.
    default_leg: AtomicUsize,
    /// Serialises default-leg promotion so the slot never points at a dead
    /// leg while a live one exists.
    promote_lock: Mutex<()>,
    pub(crate) policy: PolicyState,
    pub(crate) stats: IoStats,
    suspend: AtomicBool,
    pub(crate) retry: Arc<RetryQueue<I>>,
    registry: Arc<Registry<I>>,
    slot: usize,
    events: Arc<dyn EventSink>,
}

impl<I: Io> MirrorSet<I> {
    /// Build a set over `params.legs`, claim a registry slot and inherit
    /// counters and suspend state from a prior instance with the same name,
    /// then apply the construction-time policy and start the retry worker.
    pub fn create(
        io: I,
        registry: Arc<Registry<I>>,
        name: DeviceName,
        begin: u64,
        len: u64,
        params: TargetParams,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let nr_legs = params.legs.len();
        if !(2..=MAX_LEGS).contains(&nr_legs) {
            return Err(Error::invalid("Invalid number of mirrors"));
        }
        let mut legs = Vec::with_capacity(nr_legs);
        for (i, spec) in params.legs.iter().enumerate() {
            let dev = io.open(&spec.path).map_err(|e| {
                tracing::error!(set = %name, dev = %spec.path, "device lookup failure: {e}");
                Error::Device(e)
            })?;
            legs.push(Leg::new(i, Arc::new(dev), spec.offset));
        }

        let slot = registry.claim()?;
        let retry = RetryQueue::new();
        let ms = Arc::new(MirrorSet {
            name,
            begin,
            len,
            io,
            legs: legs.into_boxed_slice(),
            default_leg: AtomicUsize::new(DEFAULT_LEG),
            promote_lock: Mutex::new(()),
            policy: PolicyState::new(),
            stats: IoStats::default(),
            suspend: AtomicBool::new(false),
            retry: retry.clone(),
            registry: registry.clone(),
            slot,
            events,
        });
        registry.install(slot, name, Arc::downgrade(&ms));
        tracing::info!(set = %ms.name, legs = nr_legs, "mirror set init");

        if let Some(prev) = registry.find_sibling(slot, &name) {
            ms.inherit_from(&prev);
        }
        ms.policy.recompute_max_live(&ms.legs);
        ms.apply_policy(&params.policy);

        retry.spawn().map_err(Error::Worker)?;
        Ok(ms)
    }

    fn inherit_from(&self, prev: &Arc<Self>) {
        tracing::info!(
            set = %self.name,
            prev_legs = prev.legs.len(),
            legs = self.legs.len(),
            "reconfig detected, preserving counters and suspend state"
        );
        if prev.legs.len() != self.legs.len() {
            tracing::warn!(
                set = %self.name,
                "reconfig to a different number of mirror legs: {} -> {}",
                prev.legs.len(),
                self.legs.len()
            );
        }
        self.suspend
            .store(prev.suspend.load(Ordering::Acquire), Ordering::Release);
        self.policy.inherit_rr_quantum(prev.policy.rr_quantum());
        self.stats.copy_from(&prev.stats);
    }

    fn apply_policy(&self, spec: &PolicySpec) {
        match *spec {
            PolicySpec::Core => {}
            PolicySpec::RoundRobin { quantum } => {
                tracing::info!(set = %self.name, ios = quantum, "read policy: round robin");
                self.policy.set_round_robin(quantum);
            }
            PolicySpec::LogicalPart { chunk_kib } => {
                tracing::info!(set = %self.name, chunk_kib, "read policy: logical partitioning");
                self.policy.set_logical_part(chunk_kib);
            }
            PolicySpec::Weighted {
                default_weight,
                leg,
                weight,
            } => {
                tracing::info!(set = %self.name, default_weight, "read policy: weighted");
                self.policy.fill_weights(default_weight);
                self.policy.store_weight(leg, weight);
                self.policy.activate_weighted(&self.legs);
            }
        }
    }

    pub fn name(&self) -> &DeviceName {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn legs(&self) -> &[Leg<I::Device>] {
        &self.legs
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    pub fn policy(&self) -> &PolicyState {
        &self.policy
    }

    pub fn default_leg(&self) -> Option<usize> {
        match self.default_leg.load(Ordering::Acquire) {
            NO_LEG => None,
            idx => Some(idx),
        }
    }

    pub fn live_legs(&self) -> usize {
        self.legs.iter().filter(|l| l.is_alive()).count()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::Acquire)
    }

    pub(crate) fn any_alive(&self) -> bool {
        self.legs.iter().any(Leg::is_alive)
    }

    fn first_alive(&self) -> Option<usize> {
        self.legs.iter().position(Leg::is_alive)
    }

    /// Remap an upper-layer sector onto one leg.
    pub(crate) fn map_sector(&self, leg: &Leg<I::Device>, sector: u64) -> u64 {
        leg.offset() + (sector - self.begin)
    }

    pub(crate) fn choose_leg(&self, sector: u64) -> Option<usize> {
        self.policy.choose(&self.legs, sector)
    }

    /// Entry point for all I/O. Consumes the request; exactly one terminal
    /// completion is delivered through its callback, possibly before this
    /// returns.
    pub fn map(self: &Arc<Self>, req: Request) -> MapOutcome {
        let Request { sector, op, done } = req;
        match op {
            RequestOp::Read { ahead: true, .. } => {
                done(Err(Error::WouldBlock));
                MapOutcome::WouldBlock
            }
            RequestOp::Read { buf, .. } => {
                self.stats.inc_read_total();
                self.map_read(sector, buf, done)
            }
            RequestOp::Write { data, flags } => {
                self.stats.inc_write_total();
                let count = (data.len() >> SECTOR_SHIFT) as u64;
                self.map_write(sector, count, WritePayload::Data(data), flags, false, done)
            }
            RequestOp::Discard { count } => {
                self.stats.inc_write_total();
                self.map_write(
                    sector,
                    count,
                    WritePayload::Discard,
                    WriteFlags::empty(),
                    true,
                    done,
                )
            }
        }
    }

    fn map_write(
        self: &Arc<Self>,
        sector: u64,
        count: u64,
        payload: WritePayload,
        flags: WriteFlags,
        discard: bool,
        done: Done,
    ) -> MapOutcome {
        let mut targets = Vec::with_capacity(self.legs.len());
        let mut write_legs = [0usize; MAX_LEGS];
        let mut nr_live = 0;
        for leg in self.legs.iter() {
            if leg.is_alive() {
                targets.push((
                    leg.dev().clone(),
                    IoRegion {
                        sector: self.map_sector(leg, sector),
                        count,
                    },
                ));
                write_legs[nr_live] = leg.idx();
                nr_live += 1;
            }
        }
        if nr_live == 0 {
            self.log_all_dead("write");
            done(Err(Error::Io));
            return MapOutcome::Error;
        }

        self.stats.inc_write_pending();
        let info = Box::new(MapInfo {
            ms: self.clone(),
            sector,
            count,
            read_leg: NO_LEG,
            write_legs,
            nr_live,
            discard,
            done,
        });
        self.io
            .submit_write(targets, flags, payload, Box::new(move |status| {
                Self::write_done(info, status)
            }));
        MapOutcome::Submitted
    }

    /// Aggregate one fan-out batch. Success iff at least one targeted leg
    /// acknowledged; the failed ones are recorded. Discard errors surface
    /// as unsupported without degrading the array.
    fn write_done(info: Box<MapInfo<I>>, status: IoStatus) {
        let MapInfo {
            ms,
            nr_live,
            write_legs,
            discard,
            done,
            ..
        } = *info;

        let result = match status {
            IoStatus::Ok => Ok(()),
            IoStatus::Unsupported => Err(Error::Unsupported),
            IoStatus::WouldBlock => Err(Error::WouldBlock),
            IoStatus::Failed(_) if discard => Err(Error::Unsupported),
            IoStatus::Failed(mask) => {
                let mut nr_failed = 0;
                for i in 0..nr_live {
                    if mask & (1 << i) != 0 {
                        ms.fail_leg(write_legs[i], FaultKind::WRITE);
                        nr_failed += 1;
                    }
                }
                // did anyone survive?
                if nr_live > nr_failed {
                    Ok(())
                } else {
                    ms.log_all_dead("write");
                    Err(Error::Io)
                }
            }
        };

        ms.stats.dec_write_pending();
        done(result.map(|()| if discard { Completed::Discard } else { Completed::Write }));
    }

    fn map_read(self: &Arc<Self>, sector: u64, buf: BytesMut, done: Done) -> MapOutcome {
        let count = (buf.len() >> SECTOR_SHIFT) as u64;
        match self.choose_leg(sector) {
            Some(leg) => {
                self.stats.inc_read_pending();
                let info = Box::new(MapInfo {
                    ms: self.clone(),
                    sector,
                    count,
                    read_leg: leg,
                    write_legs: [0; MAX_LEGS],
                    nr_live: 0,
                    discard: false,
                    done,
                });
                Self::issue_read(info, buf);
                MapOutcome::Submitted
            }
            None => {
                self.log_all_dead("read");
                done(Err(Error::Io));
                MapOutcome::Error
            }
        }
    }

    pub(crate) fn issue_read(info: Box<MapInfo<I>>, buf: BytesMut) {
        let ms = info.ms.clone();
        let leg = &ms.legs[info.read_leg];
        let dev = leg.dev().clone();
        let region = IoRegion {
            sector: ms.map_sector(leg, info.sector),
            count: info.count,
        };
        ms.io.submit_read(
            &dev,
            region,
            buf,
            Box::new(move |status, buf| Self::read_done(info, status, buf)),
        );
    }

    fn read_done(info: Box<MapInfo<I>>, status: IoStatus, buf: BytesMut) {
        match status {
            IoStatus::Ok => {
                let MapInfo { ms, done, .. } = *info;
                ms.stats.dec_read_pending();
                done(Ok(Completed::Read(buf)));
            }
            IoStatus::Unsupported | IoStatus::WouldBlock => {
                // not a leg fault; fail the read as-is, no retry
                let MapInfo { ms, read_leg, done, .. } = *info;
                let err = match status {
                    IoStatus::Unsupported => Error::Unsupported,
                    _ => Error::WouldBlock,
                };
                tracing::error!(
                    set = %ms.name,
                    leg = read_leg,
                    dev = ms.legs[read_leg].dev().name(),
                    "failing read: {err}"
                );
                ms.stats.dec_read_pending();
                done(Err(err));
            }
            IoStatus::Failed(_) => {
                let ms = info.ms.clone();
                tracing::warn!(
                    set = %ms.name,
                    leg = info.read_leg,
                    sector = info.sector,
                    count = info.count,
                    "read I/O failure, handling it"
                );
                ms.fail_leg(info.read_leg, FaultKind::READ);

                if ms.any_alive() {
                    // restore from the scratch snapshot and hand the read to
                    // the worker for reselection
                    tracing::warn!(
                        set = %ms.name,
                        sector = info.sector,
                        "read failure, trying different mirror leg"
                    );
                    let retry = ms.retry.clone();
                    retry.push(WorkItem::Retry { info, buf });
                } else {
                    ms.log_all_dead("read");
                    let MapInfo { ms, done, .. } = *info;
                    ms.stats.dec_read_pending();
                    done(Err(Error::Io));
                }
            }
        }
    }

    /// Re-dispatch one queued read from the worker. The request terminates
    /// here when no live leg remains.
    pub(crate) fn retry_read(mut info: Box<MapInfo<I>>, buf: BytesMut) {
        let ms = info.ms.clone();
        match ms.choose_leg(info.sector) {
            Some(leg) => {
                info.read_leg = leg;
                Self::issue_read(info, buf);
            }
            None => {
                ms.log_all_dead("read");
                let MapInfo { ms, done, .. } = *info;
                ms.stats.dec_read_pending();
                done(Err(Error::Io));
            }
        }
    }

    /// Record one error class for a leg. Idempotent per (leg, kind); the
    /// first observation kills the leg for good, re-validates the default
    /// leg and schedules one operator event. Must not block: only atomics
    /// and the promotion lock are touched.
    pub(crate) fn fail_leg(self: &Arc<Self>, idx: usize, kind: FaultKind) {
        let leg = &self.legs[idx];
        if !leg.record_fault(kind) {
            return;
        }
        if leg.bump_error_count() {
            tracing::warn!(
                set = %self.name,
                leg = idx,
                dev = leg.dev().name(),
                "mirror leg is now OFFLINE"
            );
        }

        {
            let _promote = self.promote_lock.lock();
            let cur = self.default_leg.load(Ordering::Acquire);
            if cur != NO_LEG && !self.legs[cur].is_alive() {
                match self.first_alive() {
                    Some(new) => self.default_leg.store(new, Ordering::Release),
                    None => {
                        self.default_leg.store(NO_LEG, Ordering::Release);
                        tracing::warn!(set = %self.name, "all mirror legs have failed");
                        tracing::warn!(set = %self.name, info = %self.emit_status(), "mirror info");
                    }
                }
            }
        }

        self.retry.push(WorkItem::Event {
            ms: self.clone(),
            leg: idx,
        });
    }

    pub(crate) fn deliver_leg_event(&self, leg: usize) {
        self.events.leg_failed(&self.name, leg);
    }

    pub(crate) fn log_all_dead(&self, what: &str) {
        if self.stats.note_terminal_failure() {
            tracing::error!(set = %self.name, "all mirror legs dead, failing {what} I/O");
        }
    }

    /// Raise the suspend flag and wait for the retry worker to go quiescent
    /// so the upper layer can safely swap tables. In-flight writes are not
    /// cancelled; they complete through the normal path.
    pub fn presuspend(&self) {
        self.suspend.store(true, Ordering::Release);
        self.retry.flush();
    }

    pub fn postsuspend(&self) {
        debug_assert!(self.is_suspended());
    }

    pub fn resume(&self) {
        self.suspend.store(false, Ordering::Release);
    }
}

impl<I: Io> Drop for MirrorSet<I> {
    fn drop(&mut self) {
        tracing::info!(set = %self.name, "mirror set exit");
        self.registry.release(self.slot);
        self.retry.shutdown();
    }
}
