// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fc_core::CommandAck;

#[tokio::test]
async fn resolve_delivers_ack_to_registered_waiter() {
    let correlator = AckCorrelator::new();
    let id = CommandId::new();
    let rx = correlator.register(id.clone());
    assert!(correlator.resolve(CommandAck::success(id.clone(), "ok")));
    let ack = rx.await.unwrap();
    assert_eq!(ack.command_id, id);
    assert!(ack.success);
}

#[test]
fn resolve_unknown_id_returns_false() {
    let correlator = AckCorrelator::new();
    let ack = CommandAck::success(CommandId::new(), "ok");
    assert!(!correlator.resolve(ack));
}

#[tokio::test]
async fn cancel_removes_waiter_so_late_ack_is_unmatched() {
    let correlator = AckCorrelator::new();
    let id = CommandId::new();
    let _rx = correlator.register(id.clone());
    correlator.cancel(&id);
    assert!(!correlator.resolve(CommandAck::success(id, "late")));
}

#[test]
fn pending_count_tracks_registrations() {
    let correlator = AckCorrelator::new();
    let id = CommandId::new();
    let _rx = correlator.register(id.clone());
    assert_eq!(correlator.pending_count(), 1);
    correlator.resolve(CommandAck::success(id, "ok"));
    assert_eq!(correlator.pending_count(), 0);
}
