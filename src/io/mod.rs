//! The asynchronous I/O gateway between the mirror core and the underlying
//! block devices.
//!
//! The core never touches a device directly: it submits a read against one
//! leg, or a write against up to [`crate::MAX_LEGS`] legs as one batch, and
//! receives a single completion callback carrying a per-region error
//! bitmap. Callbacks may fire from any thread, including inline from
//! `submit_*`, and the core's handlers are written accordingly.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

pub mod file;

bitflags::bitflags! {
    /// Write ordering hints forwarded from the upper layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u8 {
        const FLUSH = 1 << 0;
        const FUA = 1 << 1;
    }
}

/// One contiguous range of sectors on a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRegion {
    pub sector: u64,
    pub count: u64,
}

/// Outcome of one submission, delivered to the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Ok,
    /// Bit `i` set means region `i` of the submitted batch failed.
    Failed(u64),
    /// The device cannot serve this operation (discard on an incapable
    /// queue, for instance). Must never degrade a leg.
    Unsupported,
    /// The device would have to block; only meaningful for read-ahead.
    WouldBlock,
}

impl IoStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Ok)
    }
}

pub enum WritePayload {
    Data(Bytes),
    Discard,
}

/// Read completions hand the destination buffer back so the data can flow
/// upward, or be re-issued to another leg after a failure.
pub type ReadComplete = Box<dyn FnOnce(IoStatus, BytesMut) + Send + 'static>;
pub type WriteComplete = Box<dyn FnOnce(IoStatus) + Send + 'static>;

pub trait BlockDevice: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn sectors(&self) -> u64;
}

pub trait Io: Send + Sync + 'static {
    type Device: BlockDevice;

    fn open(&self, path: &str) -> io::Result<Self::Device>;

    /// Read `region.count` sectors from one device into `buf`. The buffer
    /// length must match the region. Exactly one call to `done`.
    fn submit_read(
        &self,
        dev: &Arc<Self::Device>,
        region: IoRegion,
        buf: BytesMut,
        done: ReadComplete,
    );

    /// Issue the same payload against every target region as one parallel
    /// batch. Exactly one call to `done`, with per-region failures reported
    /// through [`IoStatus::Failed`].
    fn submit_write(
        &self,
        targets: Vec<(Arc<Self::Device>, IoRegion)>,
        flags: WriteFlags,
        payload: WritePayload,
        done: WriteComplete,
    );
}

impl<T: Io> Io for Arc<T> {
    type Device = T::Device;

    fn open(&self, path: &str) -> io::Result<Self::Device> {
        self.as_ref().open(path)
    }

    fn submit_read(
        &self,
        dev: &Arc<Self::Device>,
        region: IoRegion,
        buf: BytesMut,
        done: ReadComplete,
    ) {
        self.as_ref().submit_read(dev, region, buf, done)
    }

    fn submit_write(
        &self,
        targets: Vec<(Arc<Self::Device>, IoRegion)>,
        flags: WriteFlags,
        payload: WritePayload,
        done: WriteComplete,
    ) {
        self.as_ref().submit_write(targets, flags, payload, done)
    }
}
