//! File-backed gateway: each leg is a plain file addressed with positioned
//! reads and writes. Completions are delivered inline on the submitting
//! thread.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::io::{
    BlockDevice, Io, IoRegion, IoStatus, ReadComplete, WriteComplete, WriteFlags, WritePayload,
};
use crate::SECTOR_SHIFT;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileIo;

pub struct FileDevice {
    name: String,
    file: File,
    sectors: u64,
}

impl BlockDevice for FileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sectors(&self) -> u64 {
        self.sectors
    }
}

impl Io for FileIo {
    type Device = FileDevice;

    fn open(&self, path: &str) -> io::Result<FileDevice> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let sectors = file.metadata()?.len() >> SECTOR_SHIFT;
        Ok(FileDevice {
            name: path.to_owned(),
            file,
            sectors,
        })
    }

    fn submit_read(
        &self,
        dev: &Arc<FileDevice>,
        region: IoRegion,
        mut buf: BytesMut,
        done: ReadComplete,
    ) {
        debug_assert_eq!(buf.len() as u64, region.count << SECTOR_SHIFT);
        let status = match dev
            .file
            .read_exact_at(&mut buf[..], region.sector << SECTOR_SHIFT)
        {
            Ok(()) => IoStatus::Ok,
            Err(e) => {
                tracing::debug!(dev = dev.name(), sector = region.sector, "read failed: {e}");
                IoStatus::Failed(1)
            }
        };
        done(status, buf)
    }

    fn submit_write(
        &self,
        targets: Vec<(Arc<FileDevice>, IoRegion)>,
        flags: WriteFlags,
        payload: WritePayload,
        done: WriteComplete,
    ) {
        let data = match payload {
            WritePayload::Data(data) => data,
            // no trim on plain files
            WritePayload::Discard => return done(IoStatus::Unsupported),
        };
        let mut mask = 0u64;
        for (i, (dev, region)) in targets.iter().enumerate() {
            let res = dev
                .file
                .write_all_at(&data, region.sector << SECTOR_SHIFT)
                .and_then(|()| {
                    if flags.intersects(WriteFlags::FLUSH | WriteFlags::FUA) {
                        dev.file.sync_data()
                    } else {
                        Ok(())
                    }
                });
            if let Err(e) = res {
                tracing::debug!(dev = dev.name(), sector = region.sector, "write failed: {e}");
                mask |= 1 << i;
            }
        }
        done(if mask == 0 {
            IoStatus::Ok
        } else {
            IoStatus::Failed(mask)
        })
    }
}
