//! Control-message interface.
//!
//! Messages always carry four tokens:
//!
//! - `io_balance <policy> <param> <value>` retunes or switches the read
//!   policy; the switch is immediate and affects subsequent selections only.
//! - `io_cmd set_weight <leg> <weight>` adjusts one leg's weight.
//! - `io_cmd check_data_mirror_all block <bsize>` and
//!   `io_cmd check_data_mirror_block <sector> <bsize>` synchronously read
//!   the same blocks from every live leg and compare them pairwise,
//!   aborting with the offending sector on the first difference.

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::io::{Io, IoRegion};
use crate::leg::Leg;
use crate::mirror::MirrorSet;
use crate::policy::PolicyKind;
use crate::{PAGE_SIZE, SECTOR_SHIFT};

/// The full-device check scans at most this many sectors.
const CHECK_SCAN_LIMIT: u64 = 131072;

const PAGE_SECTORS: u64 = (PAGE_SIZE >> SECTOR_SHIFT as usize) as u64;

fn parse_num<T: std::str::FromStr>(tok: &str, what: &str) -> Result<T> {
    tok.parse()
        .map_err(|_| Error::invalid(format!("{what}: {tok}")))
}

impl<I: Io> MirrorSet<I> {
    pub fn message(&self, argv: &[&str]) -> Result<()> {
        if argv.len() != 4 {
            tracing::error!(set = %self.name, "invalid command or argument number (need 4 args)");
            return Err(Error::invalid(
                "Invalid command or argument number (need 4 args)",
            ));
        }
        match argv[0] {
            "io_balance" => self.msg_io_balance(argv),
            "io_cmd" => self.msg_io_cmd(argv),
            _ => {
                tracing::error!(set = %self.name, cmd = argv[0], "invalid command");
                Err(Error::invalid(format!("Invalid command: {}", argv[0])))
            }
        }
    }

    fn msg_io_balance(&self, argv: &[&str]) -> Result<()> {
        match argv[1] {
            "round_robin" => {
                if argv[2] != "ios" {
                    return Err(Error::invalid(format!(
                        "Invalid round_robin parameter: {}",
                        argv[2]
                    )));
                }
                let ios: u32 = parse_num(argv[3], "Invalid round robin read ios")?;
                if !(2..=1u32 << 30).contains(&ios) {
                    tracing::error!(set = %self.name, "round robin read ios have to be 2 up to 1M");
                    return Err(Error::invalid("Round robin read ios have to be 2 up to 1M"));
                }
                tracing::info!(set = %self.name, ios, "setting round robin read ios");
                if self.policy.kind() != PolicyKind::RoundRobin {
                    tracing::info!(set = %self.name, "switching read policy to round robin");
                }
                self.policy.set_round_robin(ios);
                Ok(())
            }
            "logical_part" => {
                if argv[2] != "io_chunk" {
                    return Err(Error::invalid(format!(
                        "Invalid logical_part parameter: {}",
                        argv[2]
                    )));
                }
                let chunk: u32 = parse_num(argv[3], "Invalid logical partitioning chunk")?;
                if chunk < 128 || chunk % 8 != 0 {
                    tracing::error!(
                        set = %self.name,
                        "logical partitioning chunks have to be >= 128 and a multiple of 8"
                    );
                    return Err(Error::invalid(
                        "Logical partitioning chunks have to be >= 128 and a multiple of 8",
                    ));
                }
                tracing::info!(set = %self.name, chunk_kib = chunk, "setting logical partitioning chunk");
                if self.policy.kind() != PolicyKind::LogicalPartition {
                    tracing::info!(set = %self.name, "switching read policy to logical partitioning");
                }
                self.policy.set_logical_part(chunk);
                Ok(())
            }
            "weighted" => {
                if argv[2] != "dev_weight" {
                    return Err(Error::invalid(format!(
                        "Invalid weighted parameter: {}",
                        argv[2]
                    )));
                }
                let weight: u32 = parse_num(argv[3], "Invalid device weight")?;
                if !(1..=100).contains(&weight) {
                    tracing::error!(set = %self.name, "device weights must be between 1 - 100");
                    return Err(Error::invalid(
                        "Invalid device weights: must be between 1 - 100",
                    ));
                }
                tracing::info!(set = %self.name, weight, "setting default device weights");
                if self.policy.kind() != PolicyKind::Weighted {
                    tracing::info!(set = %self.name, "switching read policy to weighted");
                }
                self.policy.fill_weights(weight);
                self.policy.activate_weighted(&self.legs);
                Ok(())
            }
            _ => {
                tracing::error!(set = %self.name, param = argv[1], "invalid io_balance parameter");
                Err(Error::invalid(format!(
                    "Invalid io_balance parameter: {}",
                    argv[1]
                )))
            }
        }
    }

    fn msg_io_cmd(&self, argv: &[&str]) -> Result<()> {
        match argv[1] {
            "set_weight" => {
                let leg: usize = parse_num(argv[2], "Invalid device number")?;
                if leg >= self.legs.len() {
                    return Err(Error::invalid(format!(
                        "Invalid device number (arg 3): has to be between 0 - {}",
                        self.legs.len()
                    )));
                }
                let weight: u32 = parse_num(argv[3], "Invalid device weight")?;
                if !(1..=100).contains(&weight) {
                    return Err(Error::invalid(
                        "Invalid device weights: must be between 1 - 100",
                    ));
                }
                tracing::info!(set = %self.name, leg, weight, "setting device weight");
                self.policy.set_weight(&self.legs, leg, weight);
                Ok(())
            }
            "check_data_mirror_all" => {
                if argv[2] != "block" {
                    return Err(Error::invalid("Invalid data unit (should be \"block\")"));
                }
                let bsize = self.validate_check_bsize(argv[3])?;
                self.check_all_data(bsize)?;
                tracing::info!(
                    set = %self.name,
                    "check_mirror_data: SUCCESS, all live mirror data consistent"
                );
                Ok(())
            }
            "check_data_mirror_block" => {
                let sector: u64 = parse_num(argv[2], "Invalid block address")?;
                if sector >= self.len {
                    return Err(Error::invalid(
                        "Invalid block address: must be between 0 and device size",
                    ));
                }
                let bsize = self.validate_check_bsize(argv[3])?;
                self.check_data_block(sector, bsize)?;
                tracing::info!(
                    set = %self.name,
                    sector,
                    "check_mirror_data_block: OK, block consistent"
                );
                Ok(())
            }
            _ => {
                tracing::error!(set = %self.name, cmd = argv[1], "invalid io_cmd command");
                Err(Error::invalid(format!("Invalid io_cmd command: {}", argv[1])))
            }
        }
    }

    fn validate_check_bsize(&self, tok: &str) -> Result<usize> {
        let bsize: usize = parse_num(tok, "Invalid block size")?;
        if bsize < PAGE_SIZE || bsize > 512 * 1024 || bsize % PAGE_SIZE != 0 {
            tracing::error!(
                set = %self.name,
                "invalid block size: must be between 4KiB - 512KiB, aligned to 4KiB"
            );
            return Err(Error::invalid(
                "Invalid block size: must be between 4KiB - 512KiB, aligned to 4KiB",
            ));
        }
        if bsize != PAGE_SIZE {
            tracing::warn!(
                set = %self.name,
                bsize = PAGE_SIZE,
                "limiting block size (only size supported currently)"
            );
        }
        Ok(PAGE_SIZE)
    }

    fn require_two_live(&self) -> Result<()> {
        let live = self.live_legs();
        if live < 2 {
            tracing::error!(
                set = %self.name,
                live,
                "found less than 2 live mirror legs, cannot compare"
            );
            return Err(Error::invalid(format!(
                "Found {live} live mirrors (less than 2), cannot compare"
            )));
        }
        Ok(())
    }

    fn check_all_data(&self, bsize: usize) -> Result<()> {
        self.require_two_live()?;
        let bsize_secs = (bsize >> SECTOR_SHIFT) as u64;
        let maxlen = self.len.min(CHECK_SCAN_LIMIT);
        let mut sector = 0;
        while sector + bsize_secs <= maxlen {
            self.compare_block(sector, bsize)?;
            if sector != 0 && sector % 4096 == 0 {
                tracing::info!(set = %self.name, sector, maxlen, "mirror check: progress");
            }
            sector += bsize_secs;
        }
        Ok(())
    }

    fn check_data_block(&self, sector: u64, bsize: usize) -> Result<()> {
        let bsize_secs = (bsize >> SECTOR_SHIFT) as u64;
        if sector % PAGE_SECTORS != 0 || sector + bsize_secs > self.len {
            tracing::error!(set = %self.name, sector, "invalid block address for check");
            return Err(Error::invalid(
                "Invalid block address: must be page aligned and within the device",
            ));
        }
        self.require_two_live()?;
        self.compare_block(sector, bsize)
    }

    /// Read one block from every live leg and compare consecutive buffers.
    fn compare_block(&self, sector: u64, bsize: usize) -> Result<()> {
        let mut prev: Option<(usize, BytesMut)> = None;
        for leg in self.legs.iter().filter(|l| l.is_alive()) {
            let buf = self.read_leg_sync(leg, sector, bsize)?;
            if let Some((prev_idx, prev_buf)) = &prev {
                if prev_buf[..] != buf[..] {
                    tracing::error!(
                        set = %self.name,
                        a = prev_idx,
                        b = leg.idx(),
                        sector,
                        "data differs between mirror legs"
                    );
                    return Err(Error::DataMismatch { sector });
                }
            }
            prev = Some((leg.idx(), buf));
        }
        Ok(())
    }

    /// One blocking read against one leg, for the check commands only.
    /// Check failures never degrade the array.
    fn read_leg_sync(&self, leg: &Leg<I::Device>, sector: u64, bsize: usize) -> Result<BytesMut> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let region = IoRegion {
            sector: self.map_sector(leg, self.begin + sector),
            count: (bsize >> SECTOR_SHIFT) as u64,
        };
        let buf = BytesMut::zeroed(bsize);
        self.io.submit_read(
            leg.dev(),
            region,
            buf,
            Box::new(move |status, buf| {
                let _ = tx.send((status, buf));
            }),
        );
        let (status, buf) = rx.recv().map_err(|_| Error::Io)?;
        if status.is_ok() {
            Ok(buf)
        } else {
            tracing::error!(
                set = %self.name,
                leg = leg.idx(),
                sector,
                "mirror check: read I/O failure"
            );
            Err(Error::Io)
        }
    }
}
