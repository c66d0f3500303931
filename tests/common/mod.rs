#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;

use mirror_sync::config::TargetParams;
use mirror_sync::error::Error;
use mirror_sync::io::{
    BlockDevice, Io, IoRegion, IoStatus, ReadComplete, WriteComplete, WriteFlags, WritePayload,
};
use mirror_sync::mirror::{Completed, Done, EventSink, MirrorSet};
use mirror_sync::name::DeviceName;
use mirror_sync::registry::Registry;
use mirror_sync::SECTOR_SHIFT;

/// Backing store of one in-memory leg, shared by name so a reconfigured
/// set opens the same data its predecessor wrote.
pub struct StubDisk {
    name: String,
    sectors: u64,
    pub data: Mutex<Vec<u8>>,
    fail_reads: AtomicBool,
}

impl StubDisk {
    /// Make every subsequent read against this disk report a failure.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::Relaxed);
    }

    pub fn fill(&self, byte: u8) {
        self.data.lock().fill(byte);
    }

    pub fn write_at(&self, sector: u64, bytes: &[u8]) {
        let off = (sector << SECTOR_SHIFT) as usize;
        self.data.lock()[off..off + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_at(&self, sector: u64, len: usize) -> Vec<u8> {
        let off = (sector << SECTOR_SHIFT) as usize;
        self.data.lock()[off..off + len].to_vec()
    }
}

/// Device handle produced by `open`; all handles with the same name share
/// one [`StubDisk`].
pub struct StubDevice {
    disk: Arc<StubDisk>,
}

impl BlockDevice for StubDevice {
    fn name(&self) -> &str {
        &self.disk.name
    }

    fn sectors(&self) -> u64 {
        self.disk.sectors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Read {
        dev: String,
        sector: u64,
        count: u64,
    },
    Write {
        regions: Vec<(String, u64, u64)>,
        discard: bool,
        flush: bool,
    },
}

enum Pending {
    Read {
        disk: Arc<StubDisk>,
        region: IoRegion,
        buf: BytesMut,
        done: ReadComplete,
    },
    Write {
        targets: Vec<(Arc<StubDisk>, IoRegion)>,
        payload: WritePayload,
        done: WriteComplete,
    },
}

/// Scripted gateway: records every submission, serves data from in-memory
/// disks, and can either complete inline (default) or hold completions
/// until the test releases them. Write outcomes can be scripted with
/// arbitrary error bitmaps.
pub struct StubIo {
    size_sectors: u64,
    disks: Mutex<Vec<Arc<StubDisk>>>,
    pub log: Mutex<Vec<Submitted>>,
    defer: AtomicBool,
    pending: Mutex<VecDeque<Pending>>,
    scripted_writes: Mutex<VecDeque<IoStatus>>,
}

impl StubIo {
    pub fn new(size_sectors: u64) -> Arc<Self> {
        Arc::new(Self {
            size_sectors,
            disks: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            defer: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            scripted_writes: Mutex::new(VecDeque::new()),
        })
    }

    fn disk(&self, name: &str) -> Arc<StubDisk> {
        let mut disks = self.disks.lock();
        if let Some(disk) = disks.iter().find(|d| d.name == name) {
            return disk.clone();
        }
        let disk = Arc::new(StubDisk {
            name: name.to_owned(),
            sectors: self.size_sectors,
            data: Mutex::new(vec![0; (self.size_sectors << SECTOR_SHIFT) as usize]),
            fail_reads: AtomicBool::new(false),
        });
        disks.push(disk.clone());
        disk
    }

    pub fn device(&self, name: &str) -> Arc<StubDisk> {
        self.disk(name)
    }

    /// Hold completions until `complete_next` instead of finishing inline.
    pub fn set_defer(&self, on: bool) {
        self.defer.store(on, Ordering::Relaxed);
    }

    /// Script the outcome of the next write submission.
    pub fn push_write_status(&self, status: IoStatus) {
        self.scripted_writes.lock().push_back(status);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn complete_next(&self) {
        let pending = self.pending.lock().pop_front().expect("nothing pending");
        match pending {
            Pending::Read {
                disk,
                region,
                buf,
                done,
            } => Self::finish_read(&disk, region, buf, done),
            Pending::Write {
                targets,
                payload,
                done,
            } => self.finish_write(&targets, payload, done),
        }
    }

    /// Device names of every read submitted so far, in order.
    pub fn reads_submitted(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|s| match s {
                Submitted::Read { dev, .. } => Some(dev.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn writes_submitted(&self) -> Vec<Submitted> {
        self.log
            .lock()
            .iter()
            .filter(|s| matches!(s, Submitted::Write { .. }))
            .cloned()
            .collect()
    }

    fn finish_read(disk: &Arc<StubDisk>, region: IoRegion, mut buf: BytesMut, done: ReadComplete) {
        if disk.fail_reads.load(Ordering::Relaxed) {
            return done(IoStatus::Failed(1), buf);
        }
        let off = (region.sector << SECTOR_SHIFT) as usize;
        let data = disk.data.lock();
        let len = buf.len();
        buf[..].copy_from_slice(&data[off..off + len]);
        drop(data);
        done(IoStatus::Ok, buf)
    }

    fn finish_write(
        &self,
        targets: &[(Arc<StubDisk>, IoRegion)],
        payload: WritePayload,
        done: WriteComplete,
    ) {
        let status = self
            .scripted_writes
            .lock()
            .pop_front()
            .unwrap_or(IoStatus::Ok);
        if let WritePayload::Data(data) = &payload {
            let failed = match status {
                IoStatus::Ok => 0,
                IoStatus::Failed(mask) => mask,
                _ => u64::MAX,
            };
            for (i, (disk, region)) in targets.iter().enumerate() {
                if failed & (1 << i) == 0 {
                    disk.write_at(region.sector, data);
                }
            }
        }
        done(status)
    }
}

impl Io for StubIo {
    type Device = StubDevice;

    fn open(&self, path: &str) -> io::Result<StubDevice> {
        Ok(StubDevice {
            disk: self.disk(path),
        })
    }

    fn submit_read(
        &self,
        dev: &Arc<StubDevice>,
        region: IoRegion,
        buf: BytesMut,
        done: ReadComplete,
    ) {
        self.log.lock().push(Submitted::Read {
            dev: dev.name().to_owned(),
            sector: region.sector,
            count: region.count,
        });
        if self.defer.load(Ordering::Relaxed) {
            self.pending.lock().push_back(Pending::Read {
                disk: dev.disk.clone(),
                region,
                buf,
                done,
            });
        } else {
            Self::finish_read(&dev.disk, region, buf, done)
        }
    }

    fn submit_write(
        &self,
        targets: Vec<(Arc<StubDevice>, IoRegion)>,
        flags: WriteFlags,
        payload: WritePayload,
        done: WriteComplete,
    ) {
        self.log.lock().push(Submitted::Write {
            regions: targets
                .iter()
                .map(|(d, r)| (d.name().to_owned(), r.sector, r.count))
                .collect(),
            discard: matches!(payload, WritePayload::Discard),
            flush: flags.contains(WriteFlags::FLUSH),
        });
        let targets: Vec<(Arc<StubDisk>, IoRegion)> = targets
            .into_iter()
            .map(|(d, r)| (d.disk.clone(), r))
            .collect();
        if self.defer.load(Ordering::Relaxed) {
            self.pending.lock().push_back(Pending::Write {
                targets,
                payload,
                done,
            });
        } else {
            self.finish_write(&targets, payload, done)
        }
    }
}

pub struct CountingEvents {
    pub log: Mutex<Vec<(String, usize)>>,
}

impl CountingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.log.lock().len()
    }
}

impl EventSink for CountingEvents {
    fn leg_failed(&self, set: &DeviceName, leg: usize) {
        self.log.lock().push((set.to_string(), leg));
    }
}

pub type Outcome = Result<Completed, Error>;

/// Collects terminal completions so tests can assert exactly-once delivery.
#[derive(Clone)]
pub struct Capture {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn done(&self) -> Done {
        let outcomes = self.outcomes.clone();
        Box::new(move |res| outcomes.lock().push(res))
    }

    pub fn count(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn take(&self) -> Vec<Outcome> {
        std::mem::take(&mut *self.outcomes.lock())
    }

    /// Wait for `n` completions; retried reads finish on the worker thread.
    pub fn wait_count(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.count() < n {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for completions"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

pub type StubSet = Arc<MirrorSet<Arc<StubIo>>>;
pub type StubRegistry = Arc<Registry<Arc<StubIo>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn mk_registry() -> StubRegistry {
    Arc::new(Registry::default())
}

pub fn mk_set(
    io: &Arc<StubIo>,
    registry: &StubRegistry,
    name: &str,
    len: u64,
    table: &str,
    events: Arc<dyn EventSink>,
) -> StubSet {
    init_tracing();
    let params = TargetParams::parse_str(table).unwrap();
    MirrorSet::create(
        io.clone(),
        registry.clone(),
        DeviceName::new(name).unwrap(),
        0,
        len,
        params,
        events,
    )
    .unwrap()
}
