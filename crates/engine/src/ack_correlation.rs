// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ack-correlation map (spec §4.5, §9 "ack-correlation actor"): one
//! `oneshot` waiter per in-flight command id. An ack with an unknown id is
//! dropped with a warning (spec §4.5 "Contract with future callers") —
//! `resolve` reports whether it found a waiter so the caller can log that.

use std::collections::HashMap;

use fc_core::CommandId;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use fc_core::CommandAck;

#[derive(Default)]
pub struct AckCorrelator {
    waiters: Mutex<HashMap<CommandId, oneshot::Sender<CommandAck>>>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`, returning the receiver half. Callers
    /// must register *before* sending the command on the wire, so an ack
    /// that arrives unusually fast is never missed.
    pub fn register(&self, id: CommandId) -> oneshot::Receiver<CommandAck> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        rx
    }

    /// Matches an incoming ack to its waiter and resolves it. Returns
    /// `true` if a waiter was found (the usual case), `false` for an
    /// unknown id (spec §4.5: already timed out, or a forged/duplicate ack).
    pub fn resolve(&self, ack: CommandAck) -> bool {
        let waiter = self.waiters.lock().remove(&ack.command_id);
        match waiter {
            Some(tx) => tx.send(ack).is_ok(),
            None => false,
        }
    }

    /// Removes a waiter without resolving it — used when the caller's
    /// timeout fires first, so a late ack finds nothing to match (it is
    /// then dropped by `resolve` as an unknown id).
    pub fn cancel(&self, id: &CommandId) {
        self.waiters.lock().remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
#[path = "ack_correlation_tests.rs"]
mod tests;
