// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the bidirectional agent <-> controller stream (spec §6).
//!
//! Each frame is a JSON object tagged by `"type"`, carried as one message
//! per underlying transport frame (a WebSocket text frame in
//! `fleetd`/`fleet-agent`). [`framing`] additionally provides a
//! length-prefixed codec for transports without native message framing,
//! used by tests and any raw-stream transport.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod framing;
pub mod messages;

pub use framing::{decode, encode, read_message, write_message, ProtocolError};
pub use messages::{
    AgentMessage, ConnectRequest, ControllerMessage, CurrentJobInfo, ErrorNotification,
    EventKind, EventMessage, HeartbeatMessage, HeartbeatRunnerState,
};

#[cfg(test)]
mod property_tests;
