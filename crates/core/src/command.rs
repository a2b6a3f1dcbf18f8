// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Commands pushed to agents over the command stream (spec §3, §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Globally unique command identifier. Chosen by the sender (the
    /// controller); echoed back verbatim in the matching `CommandAck`.
    pub struct CommandId("cmd-");
}

/// Command types in v1 (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    RegisterRunner,
    Drain,
    Shutdown,
    UpdateConfig,
    SetLogLevel,
}

crate::simple_display! {
    CommandKind {
        RegisterRunner => "register_runner",
        Drain => "drain",
        Shutdown => "shutdown",
        UpdateConfig => "update_config",
        SetLogLevel => "set_log_level",
    }
}

/// A command in flight to a specific VM. Commands are never persisted —
/// they live only in the `CommandStream` offline queue (bounded by a TTL)
/// or on the wire (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub kind: CommandKind,
    pub string_params: HashMap<String, String>,
    pub string_array_params: Vec<String>,
    pub created_at_ms: u64,
}

impl Command {
    pub fn new(kind: CommandKind, created_at_ms: u64) -> Self {
        Self {
            id: CommandId::new(),
            kind,
            string_params: HashMap::new(),
            string_array_params: Vec::new(),
            created_at_ms,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_params.insert(key.into(), value.into());
        self
    }

    pub fn with_array_params(mut self, values: Vec<String>) -> Self {
        self.string_array_params = values;
        self
    }

    /// Builds the `register_runner` command (spec §4.7c): params
    /// `{token, url, runner_group, name}`, array `labels`.
    pub fn register_runner(
        token: &str,
        runner_url: &str,
        runner_group: &str,
        runner_name: &str,
        labels: Vec<String>,
        created_at_ms: u64,
    ) -> Self {
        Self::new(CommandKind::RegisterRunner, created_at_ms)
            .with_param("token", token)
            .with_param("url", runner_url)
            .with_param("runner_group", runner_group)
            .with_param("name", runner_name)
            .with_array_params(labels)
    }
}

/// Result of a `CommandAck` (spec §4.5, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command_id: CommandId,
    pub success: bool,
    pub message: String,
    pub result: HashMap<String, String>,
}

impl CommandAck {
    pub fn success(command_id: CommandId, message: impl Into<String>) -> Self {
        Self {
            command_id,
            success: true,
            message: message.into(),
            result: HashMap::new(),
        }
    }

    pub fn failure(command_id: CommandId, message: impl Into<String>) -> Self {
        Self {
            command_id,
            success: false,
            message: message.into(),
            result: HashMap::new(),
        }
    }

    /// Ack sent back by an agent for a command type it doesn't recognise
    /// (spec §9 "Backward-compatible protocol evolution").
    pub fn unknown_command(command_id: CommandId) -> Self {
        Self::failure(command_id, "unknown command")
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
