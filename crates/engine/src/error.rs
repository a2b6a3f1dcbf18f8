// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the CommandStream/Scheduler/VMManager/Ingress loops
//! (spec §4.5, §7).

use thiserror::Error;

/// Outcome of `CommandStream::send_command` (spec §4.5).
#[derive(Debug, Clone, Error)]
pub enum SendCommandError {
    /// The VM has no live stream; the command was enqueued in the offline
    /// buffer instead (spec §4.5: "enqueue... and return NotConnected").
    #[error("vm {0} is not connected; command queued for delivery on reconnect")]
    NotConnected(String),
    /// No matching `CommandAck` arrived within the requested timeout.
    #[error("no ack for command {0} within timeout")]
    Timeout(String),
    /// The wait was aborted by process shutdown (spec §5 Cancellation).
    #[error("wait for command {0} ack was cancelled")]
    Cancelled(String),
}
