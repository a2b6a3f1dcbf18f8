// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VM status record and the effective-state derivation (spec §3, §4.2).

use crate::job::JobKey;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Cloud-provided instance name, unique within the pool. Unlike [`crate::id`]
/// types this is never generated by us — it comes from the cloud provider —
/// so it is a plain string newtype rather than a `define_id!` type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VmId(pub String);

impl VmId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VmId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VmId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for VmId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Infra state as reported by `InfraAdapter::ListManagedInstances` (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraState {
    Stopped,
    Staging,
    Provisioning,
    Running,
    Stopping,
    Unknown,
}

crate::simple_display! {
    InfraState {
        Stopped => "stopped",
        Staging => "staging",
        Provisioning => "provisioning",
        Running => "running",
        Stopping => "stopping",
        Unknown => "unknown",
    }
}

/// Agent state as reported by heartbeats (spec §4.2, §4.9). `Unknown` is the
/// state `VMStore::SetConnected` forces on disconnect so effective state
/// cannot read `READY`/`IDLE` without live evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHeartbeatState {
    Initializing,
    Connecting,
    RegisteringRunner,
    Ready,
    Idle,
    JobRunning,
    Draining,
    ShuttingDown,
    Error,
    Unknown,
}

crate::simple_display! {
    AgentHeartbeatState {
        Initializing => "initializing",
        Connecting => "connecting",
        RegisteringRunner => "registering_runner",
        Ready => "ready",
        Idle => "idle",
        JobRunning => "job_running",
        Draining => "draining",
        ShuttingDown => "shutting_down",
        Error => "error",
        Unknown => "unknown",
    }
}

/// Runner state as self-reported by the worker process via the agent
/// heartbeat (spec §6 `Heartbeat.runner_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Running,
    Offline,
}

crate::simple_display! {
    RunnerState {
        Idle => "idle",
        Running => "running",
        Offline => "offline",
    }
}

/// Derived scheduling state (spec §4.2). Pure function of
/// `(InfraState, AgentHeartbeatState)` — see [`effective_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveState {
    Stopped,
    Starting,
    Stopping,
    Booting,
    Connecting,
    Ready,
    Idle,
    Busy,
    Error,
    Unknown,
}

crate::simple_display! {
    EffectiveState {
        Stopped => "stopped",
        Starting => "starting",
        Stopping => "stopping",
        Booting => "booting",
        Connecting => "connecting",
        Ready => "ready",
        Idle => "idle",
        Busy => "busy",
        Error => "error",
        Unknown => "unknown",
    }
}

impl EffectiveState {
    /// All variants, for index rebuilds / exhaustive iteration.
    pub const ALL: [EffectiveState; 10] = [
        EffectiveState::Stopped,
        EffectiveState::Starting,
        EffectiveState::Stopping,
        EffectiveState::Booting,
        EffectiveState::Connecting,
        EffectiveState::Ready,
        EffectiveState::Idle,
        EffectiveState::Busy,
        EffectiveState::Error,
        EffectiveState::Unknown,
    ];
}

/// The §4.2 derivation table. Total and deterministic, as required by the
/// property test in spec §8.2: every `(infra, agent)` pair maps to exactly
/// one effective state.
pub fn effective_state(infra: InfraState, agent: AgentHeartbeatState) -> EffectiveState {
    use AgentHeartbeatState as A;
    use EffectiveState as E;
    use InfraState as I;

    match infra {
        I::Stopped => E::Stopped,
        I::Staging | I::Provisioning => E::Starting,
        I::Stopping => E::Stopping,
        I::Running => match agent {
            A::Initializing => E::Booting,
            A::Connecting | A::RegisteringRunner => E::Connecting,
            A::Ready => E::Ready,
            A::Idle => E::Idle,
            A::JobRunning | A::Draining => E::Busy,
            A::ShuttingDown => E::Stopping,
            A::Error => E::Error,
            A::Unknown => E::Unknown,
        },
        I::Unknown => E::Unknown,
    }
}

/// Health metrics carried on every heartbeat (spec §3, §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub cpu_pct: f32,
    pub mem_pct: f32,
}

/// Per-VM status record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStatus {
    pub vm: VmId,
    pub zone: String,
    pub infra_state: InfraState,
    pub agent_state: AgentHeartbeatState,
    pub runner_state: RunnerState,
    pub current_job: Option<JobKey>,
    pub last_heartbeat_ms: Option<u64>,
    pub connected: bool,
    pub health: HealthMetrics,
}

impl VmStatus {
    /// A freshly-seen instance, as created by `UpdateFromInfra` on first
    /// sight (spec §4.2).
    pub fn new_from_infra(vm: VmId, zone: impl Into<String>, infra_state: InfraState) -> Self {
        Self {
            vm,
            zone: zone.into(),
            infra_state,
            agent_state: AgentHeartbeatState::Unknown,
            runner_state: RunnerState::Offline,
            current_job: None,
            last_heartbeat_ms: None,
            connected: false,
            health: HealthMetrics::default(),
        }
    }

    pub fn effective_state(&self) -> EffectiveState {
        effective_state(self.infra_state, self.agent_state)
    }
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod tests;
