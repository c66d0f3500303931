//! Construction-string parsing.
//!
//! The table line is `<policy> <nparams> <params...> <nlegs> (<device>
//! <offset>){nlegs}`. The `core` policy is the legacy form kept for
//! compatibility with the original mirror module; its two parameters are
//! consumed and ignored.

use crate::error::{Error, Result};
use crate::MAX_LEGS;

const MAX_RR_QUANTUM: u32 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySpec {
    /// Legacy compatibility mode; defaults apply.
    Core,
    RoundRobin {
        quantum: u32,
    },
    LogicalPart {
        chunk_kib: u32,
    },
    Weighted {
        default_weight: u32,
        leg: usize,
        weight: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegSpec {
    pub path: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetParams {
    pub policy: PolicySpec,
    pub legs: Vec<LegSpec>,
}

fn parse_num<T: std::str::FromStr>(tok: &str, what: &str) -> Result<T> {
    tok.parse()
        .map_err(|_| Error::invalid(format!("{what}: {tok}")))
}

impl TargetParams {
    pub fn parse_str(line: &str) -> Result<Self> {
        let args: Vec<&str> = line.split_whitespace().collect();
        Self::parse(&args)
    }

    pub fn parse(args: &[&str]) -> Result<Self> {
        if args.len() < 2 {
            return Err(Error::invalid("Insufficient mirror_sync arguments"));
        }
        let nparams: usize = parse_num(args[1], "Invalid mirror_sync argument count")?;
        if args.len() < 2 + nparams {
            return Err(Error::invalid("Insufficient mirror_sync arguments"));
        }
        let params = &args[2..2 + nparams];

        let policy = match args[0] {
            "core" => {
                if nparams != 2 {
                    return Err(Error::invalid("Invalid mirror_sync core arguments"));
                }
                PolicySpec::Core
            }
            "round_robin" => {
                if nparams != 1 {
                    return Err(Error::invalid(
                        "Invalid mirror_sync round_robin arguments (need 1 arg for read I/Os)",
                    ));
                }
                let quantum: u32 = parse_num(params[0], "Invalid round_robin read I/Os")?;
                if !(2..=MAX_RR_QUANTUM).contains(&quantum) {
                    return Err(Error::invalid(
                        "Invalid round_robin read I/Os (have to be >= 2, max 1G)",
                    ));
                }
                PolicySpec::RoundRobin { quantum }
            }
            "logical_part" => {
                if nparams != 1 {
                    return Err(Error::invalid(
                        "Invalid mirror_sync logical_part argument (need 1 arg for partitioning chunks)",
                    ));
                }
                let chunk_kib: u32 = parse_num(params[0], "Invalid logical partitioning chunk")?;
                if chunk_kib < 128 || chunk_kib % 8 != 0 {
                    return Err(Error::invalid(
                        "Invalid logical partitioning chunks (have to be >= 128 and a multiple of 8)",
                    ));
                }
                PolicySpec::LogicalPart { chunk_kib }
            }
            "weighted" => {
                if nparams != 3 {
                    return Err(Error::invalid(
                        "Invalid mirror_sync weighted arguments (need 3 args for avg weight, dev idx to set X weight, weight X value)",
                    ));
                }
                let default_weight: u32 = parse_num(params[0], "Invalid device weight")?;
                let leg: usize = parse_num(params[1], "Invalid weight device index")?;
                let weight: u32 = parse_num(params[2], "Invalid device weight")?;
                if !(1..=100).contains(&default_weight) || !(1..=100).contains(&weight) {
                    return Err(Error::invalid(
                        "Invalid device weights: must be between 1 - 100",
                    ));
                }
                PolicySpec::Weighted {
                    default_weight,
                    leg,
                    weight,
                }
            }
            _ => return Err(Error::invalid("Invalid mirror_sync arguments")),
        };

        let mut idx = 2 + nparams;
        let nlegs: usize = parse_num(
            args.get(idx)
                .ok_or_else(|| Error::invalid("Insufficient mirror_sync arguments"))?,
            "Invalid number of mirrors",
        )?;
        if !(2..=MAX_LEGS).contains(&nlegs) {
            return Err(Error::invalid("Invalid number of mirrors"));
        }
        idx += 1;

        if args.len() - idx != nlegs * 2 {
            return Err(Error::invalid("Wrong number of mirror arguments"));
        }
        let mut legs = Vec::with_capacity(nlegs);
        for pair in args[idx..].chunks(2) {
            let offset: u64 = parse_num(pair[1], "Invalid offset")?;
            legs.push(LegSpec {
                path: pair[0].to_owned(),
                offset,
            });
        }

        if let PolicySpec::Weighted { leg, .. } = policy {
            if leg >= nlegs {
                return Err(Error::invalid(
                    "Invalid weight device index (have to be >= 0 and less than the number of mirror devices)",
                ));
            }
        }

        Ok(TargetParams { policy, legs })
    }
}
