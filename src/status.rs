//! Operator-facing status strings.

use std::fmt::Write as _;

use crate::io::{BlockDevice, Io};
use crate::leg::{FaultKind, Leg};
use crate::mirror::MirrorSet;
use crate::policy::PolicyKind;

const BUILD_TAG: &str = concat!("dms/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    /// Human-oriented: policy, per-leg health, I/O counters.
    Info,
    /// The device portion of the construction string, round-trip parseable.
    Table,
}

/// One character for the most severe state of a leg:
/// `A` alive, `D` write failure recorded, `U` any other failure.
fn device_status_char<D>(leg: &Leg<D>) -> char {
    if leg.is_alive() {
        return 'A';
    }
    if leg.fault_bits().contains(FaultKind::WRITE) {
        'D'
    } else {
        'U'
    }
}

impl<I: Io> MirrorSet<I> {
    pub fn status(&self, kind: StatusType) -> String {
        match kind {
            StatusType::Info => format!("{BUILD_TAG} {}", self.emit_status()),
            StatusType::Table => {
                let mut out = format!("{}", self.legs.len());
                for leg in self.legs.iter() {
                    write!(out, " {} {}", leg.dev().name(), leg.offset()).ok();
                }
                out
            }
        }
    }

    fn policy_info(&self) -> String {
        match self.policy.kind() {
            PolicyKind::RoundRobin => format!("RR,ios={}", self.policy.rr_quantum()),
            PolicyKind::LogicalPartition => format!("LP,c={}kb", self.policy.lp_chunk_kib()),
            PolicyKind::Weighted => {
                let mut out = format!("CW,wml={}", self.policy.max_weight_live());
                for i in 0..self.legs.len() {
                    write!(out, ",w[{}]={}", i, self.policy.weight(i)).ok();
                }
                out
            }
        }
    }

    /// Set summary shared by the INFO status and the all-dead log dump.
    pub(crate) fn emit_status(&self) -> String {
        let mut out = format!("{} {} ", self.legs.len(), self.policy_info());
        let mut live = 0;
        for (i, leg) in self.legs.iter().enumerate() {
            write!(out, "{},{},{} ", i, leg.dev().name(), device_status_char(leg)).ok();
            if leg.is_alive() {
                live += 1;
            }
        }
        write!(
            out,
            "\n==> Live_Devs: {}, IO_Count: TRD: {} ORD: {} TWR: {} OWR: {}",
            live,
            self.stats.read_total(),
            self.stats.read_pending(),
            self.stats.write_total(),
            self.stats.write_pending()
        )
        .ok();
        out
    }
}
