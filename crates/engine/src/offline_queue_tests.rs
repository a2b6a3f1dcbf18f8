// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fc_core::CommandKind;

fn cmd() -> Command {
    Command::new(CommandKind::Drain, 0)
}

#[test]
fn flush_on_empty_queue_returns_nothing() {
    let q = OfflineQueue::new();
    assert!(q.flush(&VmId::new("vm-1"), 1_000, 300_000).is_empty());
}

#[test]
fn push_then_flush_returns_command_once() {
    let q = OfflineQueue::new();
    q.push(VmId::new("vm-1"), cmd(), 1_000);
    assert_eq!(q.len_for(&VmId::new("vm-1")), 1);
    let flushed = q.flush(&VmId::new("vm-1"), 2_000, 300_000);
    assert_eq!(flushed.len(), 1);
    // never delivered twice: the queue is now empty.
    assert!(q.flush(&VmId::new("vm-1"), 3_000, 300_000).is_empty());
}

#[test]
fn flush_drops_entries_older_than_ttl() {
    let q = OfflineQueue::new();
    q.push(VmId::new("vm-1"), cmd(), 0);
    let flushed = q.flush(&VmId::new("vm-1"), 400_000, 300_000);
    assert!(flushed.is_empty());
}

#[test]
fn flush_keeps_entries_within_ttl() {
    let q = OfflineQueue::new();
    q.push(VmId::new("vm-1"), cmd(), 0);
    let flushed = q.flush(&VmId::new("vm-1"), 299_000, 300_000);
    assert_eq!(flushed.len(), 1);
}

#[test]
fn purge_expired_removes_only_stale_entries() {
    let q = OfflineQueue::new();
    q.push(VmId::new("vm-1"), cmd(), 0);
    q.push(VmId::new("vm-1"), cmd(), 400_000);
    let purged = q.purge_expired(400_000, 300_000);
    assert_eq!(purged, 1);
    assert_eq!(q.len_for(&VmId::new("vm-1")), 1);
}

#[test]
fn queues_are_independent_per_vm() {
    let q = OfflineQueue::new();
    q.push(VmId::new("vm-1"), cmd(), 0);
    assert_eq!(q.len_for(&VmId::new("vm-2")), 0);
}
