mod common;

use std::sync::Arc;

use bytes::Bytes;

use common::*;
use mirror_sync::error::Error;
use mirror_sync::io::{IoStatus, WriteFlags};
use mirror_sync::mirror::{LogEvents, Request};
use mirror_sync::policy::PolicyKind;

fn two_leg_set(io: &Arc<StubIo>, registry: &StubRegistry, len: u64) -> StubSet {
    mk_set(
        io,
        registry,
        "dms0",
        len,
        "core 2 64 nosync 2 d0 0 d1 0",
        Arc::new(LogEvents),
    )
}

#[test]
fn messages_require_exactly_four_tokens() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    assert!(ms.message(&["io_balance", "round_robin", "ios"]).is_err());
    assert!(ms
        .message(&["io_balance", "round_robin", "ios", "8", "9"])
        .is_err());
    assert!(ms.message(&["bogus", "round_robin", "ios", "8"]).is_err());
}

#[test]
fn io_balance_switches_policies() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    ms.message(&["io_balance", "logical_part", "io_chunk", "256"])
        .unwrap();
    assert_eq!(ms.policy().kind(), PolicyKind::LogicalPartition);
    assert_eq!(ms.policy().lp_chunk_kib(), 256);

    ms.message(&["io_balance", "weighted", "dev_weight", "30"])
        .unwrap();
    assert_eq!(ms.policy().kind(), PolicyKind::Weighted);
    assert_eq!(ms.policy().weight(0), 30);
    assert_eq!(ms.policy().weight(1), 30);
    assert_eq!(ms.policy().max_weight_live(), 0);

    ms.message(&["io_balance", "round_robin", "ios", "16"])
        .unwrap();
    assert_eq!(ms.policy().kind(), PolicyKind::RoundRobin);
    assert_eq!(ms.policy().rr_quantum(), 16);
}

#[test]
fn io_balance_rejects_out_of_range_values() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    assert!(ms.message(&["io_balance", "round_robin", "ios", "1"]).is_err());
    assert!(ms
        .message(&["io_balance", "round_robin", "count", "8"])
        .is_err());
    assert!(ms
        .message(&["io_balance", "logical_part", "io_chunk", "64"])
        .is_err());
    assert!(ms
        .message(&["io_balance", "logical_part", "io_chunk", "130"])
        .is_err());
    assert!(ms
        .message(&["io_balance", "weighted", "dev_weight", "0"])
        .is_err());
    assert!(ms
        .message(&["io_balance", "weighted", "dev_weight", "101"])
        .is_err());
    assert!(ms.message(&["io_balance", "striped", "ios", "8"]).is_err());
    // nothing switched
    assert_eq!(ms.policy().kind(), PolicyKind::RoundRobin);
}

#[test]
fn set_weight_updates_the_cached_max() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    ms.message(&["io_balance", "weighted", "dev_weight", "30"])
        .unwrap();
    ms.message(&["io_cmd", "set_weight", "1", "80"]).unwrap();
    assert_eq!(ms.policy().weight(1), 80);
    assert_eq!(ms.policy().max_weight_live(), 1);

    // equal to the current max: lowest index wins the tie
    ms.message(&["io_cmd", "set_weight", "0", "80"]).unwrap();
    assert_eq!(ms.policy().max_weight_live(), 0);

    assert!(ms.message(&["io_cmd", "set_weight", "2", "50"]).is_err());
    assert!(ms.message(&["io_cmd", "set_weight", "0", "0"]).is_err());
    assert!(ms.message(&["io_cmd", "set_weight", "0", "101"]).is_err());
}

#[test]
fn check_data_passes_on_identical_legs() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    io.device("d0").fill(0x11);
    io.device("d1").fill(0x11);

    ms.message(&["io_cmd", "check_data_mirror_all", "block", "4096"])
        .unwrap();
    ms.message(&["io_cmd", "check_data_mirror_block", "0", "4096"])
        .unwrap();
    ms.message(&["io_cmd", "check_data_mirror_block", "8", "4096"])
        .unwrap();
}

#[test]
fn check_data_reports_the_first_differing_sector() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    io.device("d0").fill(0x11);
    io.device("d1").fill(0x11);
    // corrupt the second page of d1
    io.device("d1").write_at(8, &[0xee; 4096]);

    let err = ms
        .message(&["io_cmd", "check_data_mirror_all", "block", "4096"])
        .err()
        .unwrap();
    assert!(matches!(err, Error::DataMismatch { sector: 8 }));

    ms.message(&["io_cmd", "check_data_mirror_block", "0", "4096"])
        .unwrap();
    let err = ms
        .message(&["io_cmd", "check_data_mirror_block", "8", "4096"])
        .err()
        .unwrap();
    assert!(matches!(err, Error::DataMismatch { sector: 8 }));
}

#[test]
fn check_data_validates_its_arguments() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    // block size out of range or unaligned
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_all", "block", "512"])
        .is_err());
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_all", "block", "4097"])
        .is_err());
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_all", "block", "1048576"])
        .is_err());
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_all", "sector", "4096"])
        .is_err());
    // address unaligned or out of bounds
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_block", "3", "4096"])
        .is_err());
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_block", "64", "4096"])
        .is_err());
    assert!(ms
        .message(&["io_cmd", "check_data_mirror_block", "60", "4096"])
        .is_err());
}

#[test]
fn check_data_needs_two_live_legs() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    io.push_write_status(IoStatus::Failed(0b10));
    let cap = Capture::new();
    ms.map(Request::write(
        0,
        Bytes::from(vec![0u8; 512]),
        WriteFlags::empty(),
        cap.done(),
    ));
    cap.wait_count(1);
    assert_eq!(ms.live_legs(), 1);

    assert!(ms
        .message(&["io_cmd", "check_data_mirror_all", "block", "4096"])
        .is_err());
    ms.presuspend();
    ms.resume();
}

#[test]
fn oversized_block_sizes_fall_back_to_one_page() {
    let io = StubIo::new(64);
    let registry = mk_registry();
    let ms = two_leg_set(&io, &registry, 64);

    io.device("d0").fill(0x22);
    io.device("d1").fill(0x22);
    // accepted, but compared page by page
    ms.message(&["io_cmd", "check_data_mirror_all", "block", "8192"])
        .unwrap();
    // every read the check submitted was one page long
    for s in io.log.lock().iter() {
        if let Submitted::Read { count, .. } = s {
            assert_eq!(*count, 8);
        }
    }
}
