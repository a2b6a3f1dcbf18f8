// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sum types carried over the agent <-> controller stream (spec §6).

use std::collections::HashMap;

use fc_core::{Command, CommandAck, HealthMetrics};
use serde::{Deserialize, Serialize};

/// First message an agent must send on a freshly opened stream (spec §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub vm_id: String,
    pub pool_id: String,
    pub org_id: String,
    pub version: String,
}

/// Known event types (spec §4.7, §4.9). New variants are appended, never
/// renumbered or removed, per the backward-compatible evolution note in
/// spec §9 — hence `Other(String)` rather than a closed enum on the wire.
/// (De)serialized by hand as a bare string rather than via derive, since
/// serde's `#[serde(other)]` fallback only targets unit variants and can't
/// carry the unrecognized string through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    RunnerRegistered,
    JobStarted,
    JobCompleted,
    RunnerCrashed,
    VmShuttingDown,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RunnerRegistered => "runner_registered",
            Self::JobStarted => "job_started",
            Self::JobCompleted => "job_completed",
            Self::RunnerCrashed => "runner_crashed",
            Self::VmShuttingDown => "vm_shutting_down",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "runner_registered" => Self::RunnerRegistered,
            "job_started" => Self::JobStarted,
            "job_completed" => Self::JobCompleted,
            "runner_crashed" => Self::RunnerCrashed,
            "vm_shutting_down" => Self::VmShuttingDown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from(s.as_str()))
    }
}

/// Agent -> controller event notification (spec §4.7 event callback, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub vm_id: String,
    pub pool_id: String,
    pub org_id: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    pub timestamp_ms: u64,
}

impl EventMessage {
    pub fn new(kind: EventKind, vm_id: impl Into<String>, pool_id: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            kind,
            vm_id: vm_id.into(),
            pool_id: pool_id.into(),
            org_id: String::new(),
            data: HashMap::new(),
            timestamp_ms,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// `job_completed` carries `success` as a stringly-typed field on the
    /// generic `data` bag (spec §6 keeps the envelope generic); this reads
    /// it back as a bool, defaulting to `false` if missing/malformed so a
    /// malformed event never silently reads as success.
    pub fn success_flag(&self) -> bool {
        self.data
            .get("success")
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

/// Current job snapshot carried on a `Heartbeat` while `JobRunning` (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentJobInfo {
    pub job_id: String,
    pub run_id: String,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub status: String,
    pub started_at_ms: u64,
}

/// The runner-state sub-object on a heartbeat (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRunnerState {
    pub state: String,
    pub configured: bool,
    pub runner_name: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Agent -> controller heartbeat (spec §4.9, every 15s by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub vm_id: String,
    pub pool_id: String,
    pub org_id: String,
    pub health: HealthMetrics,
    pub runner_state: HeartbeatRunnerState,
    pub current_job: Option<CurrentJobInfo>,
    pub timestamp_ms: u64,
}

/// Carried on either direction when a party wants to report a protocol- or
/// application-level error without tearing down the stream (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotification {
    pub code: String,
    pub message: String,
}

/// Messages an agent sends to the controller (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Connect(ConnectRequest),
    CommandAck(CommandAck),
    Event(EventMessage),
    Heartbeat(HeartbeatMessage),
    ErrorNotification(ErrorNotification),
}

/// Messages the controller sends to an agent (spec §6 `ControllerMessage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    ConnectAck {
        accepted: bool,
        message: String,
        server_version: String,
    },
    Command(Command),
    ErrorNotification(ErrorNotification),
}

impl ControllerMessage {
    pub fn accept(server_version: impl Into<String>) -> Self {
        Self::ConnectAck {
            accepted: true,
            message: String::new(),
            server_version: server_version.into(),
        }
    }

    pub fn reject(message: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self::ConnectAck {
            accepted: false,
            message: message.into(),
            server_version: server_version.into(),
        }
    }
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
