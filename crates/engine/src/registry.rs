// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `vm -> stream` registry (spec §4.5, §9 "registry actor"). A single
//! mutex guards the registry; every operation is O(1) and never awaits
//! while held, so a plain `parking_lot::Mutex` is the whole implementation
//! — no message passing needed to keep the single-writer discipline
//! explicit here.

use std::collections::HashMap;

use fc_core::VmId;
use fc_wire::ControllerMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// The controller-side half of one agent's stream. Cloning is cheap
/// (`mpsc::UnboundedSender` is an `Arc` internally); the daemon's WebSocket
/// task owns the matching receiver and forwards frames onto the wire.
pub type ConnectionSender = mpsc::UnboundedSender<ControllerMessage>;

#[derive(Default)]
pub struct Registry {
    streams: Mutex<HashMap<VmId, ConnectionSender>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection, replacing any prior entry
    /// for this VM (a stale stream from before a reconnect).
    pub fn register(&self, vm: VmId, sender: ConnectionSender) {
        self.streams.lock().insert(vm, sender);
    }

    pub fn unregister(&self, vm: &VmId) {
        self.streams.lock().remove(vm);
    }

    pub fn is_connected(&self, vm: &VmId) -> bool {
        self.streams.lock().contains_key(vm)
    }

    /// Sends a frame if the VM has a live connection. Returns `false` if
    /// there is no entry, or if the send failed because the receiving
    /// WebSocket task has already exited (in which case the stale entry is
    /// dropped from the registry).
    pub fn send(&self, vm: &VmId, message: ControllerMessage) -> bool {
        let sender = { self.streams.lock().get(vm).cloned() };
        match sender {
            Some(sender) => {
                if sender.send(message).is_ok() {
                    true
                } else {
                    self.streams.lock().remove(vm);
                    false
                }
            }
            None => false,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.streams.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
