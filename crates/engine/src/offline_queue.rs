// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-VM offline command buffer (spec §4.5, §9 "offline-queue actor").
//! Commands for a disconnected VM are held here, tagged with creation
//! time, and dropped on flush if older than the TTL — never delivered
//! twice (spec §8 property 5).

use std::collections::HashMap;

use fc_core::{Command, VmId};
use parking_lot::Mutex;

struct Entry {
    command: Command,
    queued_at_ms: u64,
}

#[derive(Default)]
pub struct OfflineQueue {
    by_vm: Mutex<HashMap<VmId, Vec<Entry>>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, vm: VmId, command: Command, now_ms: u64) {
        self.by_vm
            .lock()
            .entry(vm)
            .or_default()
            .push(Entry { command, queued_at_ms: now_ms });
    }

    /// Drains every still-fresh command queued for `vm` (discarding any
    /// past `ttl_ms`), for delivery on reconnect (spec §4.5 "flushes any
    /// queued commands for that VM"). Each returned command is removed
    /// from the queue — it is never delivered twice.
    pub fn flush(&self, vm: &VmId, now_ms: u64, ttl_ms: u64) -> Vec<Command> {
        let entries = self.by_vm.lock().remove(vm).unwrap_or_default();
        entries
            .into_iter()
            .filter(|e| now_ms.saturating_sub(e.queued_at_ms) <= ttl_ms)
            .map(|e| e.command)
            .collect()
    }

    pub fn len_for(&self, vm: &VmId) -> usize {
        self.by_vm.lock().get(vm).map(Vec::len).unwrap_or(0)
    }

    /// Periodic sweep dropping expired entries from VMs that may never
    /// reconnect, so the queue does not grow unbounded.
    pub fn purge_expired(&self, now_ms: u64, ttl_ms: u64) -> usize {
        let mut purged = 0;
        let mut by_vm = self.by_vm.lock();
        by_vm.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| now_ms.saturating_sub(e.queued_at_ms) <= ttl_ms);
            purged += before - entries.len();
            !entries.is_empty()
        });
        purged
    }
}

#[cfg(test)]
#[path = "offline_queue_tests.rs"]
mod tests;
