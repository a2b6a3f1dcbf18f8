// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CommandStream: the controller-side logic of the bidirectional agent
//! stream (spec §4.5). Transport-agnostic — the daemon's WebSocket task
//! owns the actual socket and calls into this module for registration,
//! inbound-message handling, and outbound command delivery. The three
//! pieces of process-local mutable state (registry, offline queue,
//! ack-correlation map) are each their own small owner (spec §9), never
//! locked together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fc_core::{Clock, Command, RunnerState, VmId};
use fc_storage::{KvStore, VmStore};
use fc_wire::{AgentMessage, ControllerMessage, EventMessage, HeartbeatMessage};
use tracing::warn;

use crate::ack_correlation::AckCorrelator;
use crate::error::SendCommandError;
use crate::offline_queue::OfflineQueue;
use crate::registry::{ConnectionSender, Registry};

/// Default offline-queue TTL (spec §3 "Command... held... with a TTL (e.g.
/// five minutes)").
pub const DEFAULT_OFFLINE_QUEUE_TTL_MS: u64 = 5 * 60 * 1000;

/// Receives agent events (spec §4.5 "Events invoke an event callback
/// registered by the Scheduler").
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, vm: VmId, event: EventMessage);
}

pub struct CommandStream<K: KvStore, C: Clock> {
    vm_store: Arc<VmStore<K>>,
    clock: C,
    registry: Registry,
    offline_queue: OfflineQueue,
    ack_correlator: AckCorrelator,
    event_handler: Arc<dyn EventHandler>,
    offline_queue_ttl_ms: u64,
}

fn runner_state_from_wire(state: &str) -> RunnerState {
    match state {
        "running" => RunnerState::Running,
        "idle" => RunnerState::Idle,
        _ => RunnerState::Offline,
    }
}

impl<K: KvStore, C: Clock> CommandStream<K, C> {
    pub fn new(vm_store: Arc<VmStore<K>>, clock: C, event_handler: Arc<dyn EventHandler>) -> Self {
        Self {
            vm_store,
            clock,
            registry: Registry::new(),
            offline_queue: OfflineQueue::new(),
            ack_correlator: AckCorrelator::new(),
            event_handler,
            offline_queue_ttl_ms: DEFAULT_OFFLINE_QUEUE_TTL_MS,
        }
    }

    /// Called once the agent's `ConnectRequest` has been accepted.
    /// Registers the stream and returns any queued commands to deliver
    /// immediately (spec §4.5 "flushes any queued commands for that VM").
    pub fn register_connection(&self, vm: VmId, sender: ConnectionSender) -> Vec<Command> {
        let now_ms = self.clock.epoch_ms();
        let queued = self.offline_queue.flush(&vm, now_ms, self.offline_queue_ttl_ms);
        self.registry.register(vm, sender);
        queued
    }

    /// Called on stream termination, either side (spec §4.5). The registry
    /// entry is removed and the VM is marked disconnected, which forces
    /// its agent state to `Unknown` (spec §4.2 `SetConnected`).
    pub async fn unregister_connection(&self, vm: &VmId) {
        self.registry.unregister(vm);
        if let Err(e) = self.vm_store.set_connected(vm, false).await {
            warn!(%vm, error = %e, "failed to record vm disconnect");
        }
    }

    pub fn is_connected(&self, vm: &VmId) -> bool {
        self.registry.is_connected(vm)
    }

    /// `SendCommand(vm, cmd, timeout)` (spec §4.5).
    pub async fn send_command(
        &self,
        vm: &VmId,
        command: Command,
        timeout: Duration,
    ) -> Result<fc_core::CommandAck, SendCommandError> {
        let now_ms = self.clock.epoch_ms();
        if !self.registry.is_connected(vm) {
            self.offline_queue.push(vm.clone(), command, now_ms);
            return Err(SendCommandError::NotConnected(vm.to_string()));
        }

        let rx = self.ack_correlator.register(command.id.clone());
        let command_id = command.id.clone();
        if !self.registry.send(vm, ControllerMessage::Command(command.clone())) {
            self.ack_correlator.cancel(&command_id);
            self.offline_queue.push(vm.clone(), command, now_ms);
            return Err(SendCommandError::NotConnected(vm.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(SendCommandError::Cancelled(command_id.to_string())),
            Err(_) => {
                self.ack_correlator.cancel(&command_id);
                Err(SendCommandError::Timeout(command_id.to_string()))
            }
        }
    }

    /// Dispatches one inbound agent message (spec §4.5: "Heartbeats are
    /// processed in-line with the receive loop... Events invoke an event
    /// callback").
    pub async fn handle_agent_message(&self, vm: &VmId, message: AgentMessage) {
        match message {
            AgentMessage::Connect(_) => {
                warn!(%vm, "protocol violation: Connect sent after stream already established");
            }
            AgentMessage::CommandAck(ack) => {
                if !self.ack_correlator.resolve(ack.clone()) {
                    warn!(%vm, command_id = %ack.command_id, "ack for unknown or already-timed-out command");
                }
            }
            AgentMessage::Heartbeat(heartbeat) => self.handle_heartbeat(vm, heartbeat).await,
            AgentMessage::Event(event) => self.event_handler.handle_event(vm.clone(), event).await,
            AgentMessage::ErrorNotification(notice) => {
                warn!(%vm, code = %notice.code, message = %notice.message, "agent-reported error");
            }
        }
    }

    async fn handle_heartbeat(&self, vm: &VmId, heartbeat: HeartbeatMessage) {
        let agent_state = heartbeat_agent_state(&heartbeat.runner_state.state);
        let runner_state = runner_state_from_wire(&heartbeat.runner_state.state);
        let now_ms = self.clock.epoch_ms();
        // The heartbeat's `current_job` carries only a string job id with
        // no installation — not enough to build a `fc_core::JobKey`
        // (spec §6 leaves the envelope generic here). `JobStore`'s
        // vm-reverse-index remains the authoritative source for "this
        // VM's current job"; VMStore's own `current_job` is left `None`
        // and is purely a diagnostics cache, not load-bearing.
        if let Err(e) = self
            .vm_store
            .update_from_heartbeat(vm.clone(), agent_state, runner_state, heartbeat.health, None, now_ms)
            .await
        {
            warn!(%vm, error = %e, "failed to persist heartbeat");
        }
    }

    pub fn offline_queue_len(&self, vm: &VmId) -> usize {
        self.offline_queue.len_for(vm)
    }

    pub fn connected_count(&self) -> usize {
        self.registry.connected_count()
    }

    pub fn pending_ack_count(&self) -> usize {
        self.ack_correlator.pending_count()
    }

    /// Periodic sweep dropping stale offline-queue entries (spec §9).
    pub fn purge_offline_queue(&self) -> usize {
        let now_ms = self.clock.epoch_ms();
        self.offline_queue.purge_expired(now_ms, self.offline_queue_ttl_ms)
    }
}

/// The wire only reports a flat runner-state string on the heartbeat's
/// `runner_state` sub-object (spec §6); the agent state used by the
/// effective-state table (spec §4.2) is a richer enum than that string
/// alone encodes, but a connected agent reporting *any* runner state is,
/// by definition, at least `Ready` from the controller's point of view —
/// finer-grained states (`Connecting`, `RegisteringRunner`) are only ever
/// observed via the *absence* of a heartbeat, not its content.
fn heartbeat_agent_state(runner_state: &str) -> fc_core::AgentHeartbeatState {
    use fc_core::AgentHeartbeatState as A;
    match runner_state {
        "running" => A::JobRunning,
        "idle" => A::Idle,
        _ => A::Ready,
    }
}

#[cfg(test)]
#[path = "command_stream_tests.rs"]
mod tests;
