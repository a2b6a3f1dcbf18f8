// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the agent loop (spec §7: "the agent never holds a
//! command it cannot execute — it either acks `success=true` or acks
//! `success=false` with a message").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("install failed: {0}")]
    Install(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("worker process error: {0}")]
    Worker(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}
