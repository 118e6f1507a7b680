//! Full absorb-then-drain cycle through the public `GencompRouter` API:
//! OOB and DEPN lines interleaved across several MAIN VBs, queue overflow
//! forcing a DEPN offload, and the dispatcher draining every source in
//! its documented priority order at the end.

use ctxzip::gencomp::{GencompKind, GencompRouter, GencompSource};

#[test]
fn mixed_absorb_then_full_drain_respects_priority_and_offload() {
    let mut router = GencompRouter::new(64, 1, false);

    // VB 1: one DEPN line, queued.
    router.absorb_line(GencompKind::Depn, 1, 0, b"depn-vb1\n", false).unwrap();
    router.flush_depn().unwrap();
    router.mark_main_vb_absorbed();

    // VB 2: a second DEPN line forces the first out of the single-slot
    // queue into the offload list, plus one OOB line.
    router.absorb_line(GencompKind::Depn, 2, 9, b"depn-vb2\n", false).unwrap();
    router.flush_depn().unwrap();
    router.absorb_line(GencompKind::Oob, 2, 18, b"oob-vb2\n", false).unwrap();
    router.flush_oob();
    router.mark_main_vb_absorbed();

    router.finish_absorbing();

    match router.next_vb_source() {
        Some(GencompSource::Oob(slot)) => assert_eq!(slot.bytes, b"oob-vb2\n"),
        other => panic!("expected OOB drained first, got {:?}", debug_kind(&other)),
    }
    match router.next_vb_source() {
        Some(GencompSource::Depn(slot)) => assert_eq!(slot.bytes, b"depn-vb2\n", "in-memory DEPN queue drains before the offloaded batch"),
        other => panic!("expected in-memory DEPN second, got {:?}", debug_kind(&other)),
    }
    match router.next_vb_source() {
        Some(GencompSource::DepnOffloaded(rec)) => assert_eq!(rec.decompress().unwrap(), b"depn-vb1\n"),
        other => panic!("expected offloaded DEPN third, got {:?}", debug_kind(&other)),
    }
    assert!(router.next_vb_source().is_none(), "router must report empty once every source has drained");
}

#[test]
fn oob_never_releases_before_absorption_finishes_for_depn() {
    let mut router = GencompRouter::new(64, 4, false);
    router.absorb_line(GencompKind::Depn, 0, 0, b"d\n", false).unwrap();
    router.flush_depn().unwrap();
    // No OOB at all and absorption not yet finished: DEPN must wait.
    assert!(router.next_vb_source().is_none());
    router.finish_absorbing();
    assert!(matches!(router.next_vb_source(), Some(GencompSource::Depn(_))));
}

fn debug_kind(source: &Option<GencompSource>) -> &'static str {
    match source {
        Some(GencompSource::Oob(_)) => "Oob",
        Some(GencompSource::Depn(_)) => "Depn",
        Some(GencompSource::DepnOffloaded(_)) => "DepnOffloaded",
        Some(GencompSource::Reread(_)) => "Reread",
        None => "None",
    }
}
