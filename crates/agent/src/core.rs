// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-side state machine (spec §4.9): `Initializing -> Connecting ->
//! Ready -> RegisteringRunner -> Idle <-> JobRunning`, plus `Draining`,
//! `ShuttingDown`, `Error`. Drives installation, the bidirectional stream,
//! and worker supervision through small traits so the whole loop runs
//! under a fake transport/installer/worker in tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fc_core::{Clock, Command, CommandAck, CommandKind, HealthMetrics};
use fc_wire::{
    AgentMessage, ConnectRequest, ControllerMessage, CurrentJobInfo, EventKind, EventMessage, HeartbeatMessage,
    HeartbeatRunnerState,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::install::Installer;
use crate::state::AgentState;
use crate::transport::{StreamTransport, TransportEvent};
use crate::worker::{WorkerEvent, WorkerSupervisor};

/// Parameters extracted from a `register_runner` command (spec §4.9
/// `Ready`: "extract `{token, url, group, labels}`").
struct RegistrationParams {
    token: String,
    url: String,
    group: String,
    labels: Vec<String>,
}

impl RegistrationParams {
    fn from_command(cmd: &Command) -> Result<Self, AgentError> {
        let get = |key: &str| -> Result<String, AgentError> {
            cmd.string_params
                .get(key)
                .cloned()
                .ok_or_else(|| AgentError::Protocol(format!("register_runner missing `{key}`")))
        };
        Ok(Self {
            token: get("token")?,
            url: get("url")?,
            group: get("runner_group")?,
            labels: cmd.string_array_params.clone(),
        })
    }
}

pub struct AgentCore<In: Installer, Tr: StreamTransport, Wk: WorkerSupervisor, Ck: Clock> {
    config: AgentConfig,
    installer: Arc<In>,
    transport: Arc<Tr>,
    worker: Arc<Wk>,
    clock: Ck,
}

impl<In: Installer, Tr: StreamTransport, Wk: WorkerSupervisor, Ck: Clock> AgentCore<In, Tr, Wk, Ck> {
    pub fn new(config: AgentConfig, installer: Arc<In>, transport: Arc<Tr>, worker: Arc<Wk>, clock: Ck) -> Self {
        Self { config, installer, transport, worker, clock }
    }

    /// Runs the full state machine until `cancel` fires or the loop hits
    /// `Error` (spec §4.9 "Process supervisor will restart the agent").
    /// Returns `Ok(())` on a graceful shutdown, `Err` on a terminal error
    /// (the caller/process supervisor decides whether to restart).
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        let worker_path = self.initializing().await?;

        let (out_tx, mut in_rx) = self.connecting(&cancel).await?;

        let reg_params = match self.ready(&mut in_rx, &out_tx, &cancel).await? {
            Some(p) => p,
            None => return Ok(()),
        };

        let mut worker_events = self.registering_runner(&worker_path, &reg_params, &out_tx).await?;

        self.idle_loop(&mut in_rx, &mut worker_events, &out_tx, &cancel).await
    }

    async fn initializing(&self) -> Result<PathBuf, AgentError> {
        info!(vm_id = %self.config.vm_id, "installing worker binary");
        self.installer
            .install(&self.config.worker_binary_url, &self.config.worker_binary_sha256)
            .await
    }

    /// `Connecting` (spec §4.9): exponential backoff between attempts,
    /// initial/cap from config, until `connect` succeeds or cancellation.
    async fn connecting(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(mpsc::UnboundedSender<AgentMessage>, mpsc::UnboundedReceiver<TransportEvent>), AgentError> {
        let request = ConnectRequest {
            vm_id: self.config.vm_id.clone(),
            pool_id: self.config.pool_id.clone(),
            org_id: self.config.org_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let mut backoff = self.config.reconnect_initial_backoff;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Connect("cancelled before connect".into())),
                result = self.transport.connect(request.clone()) => {
                    match result {
                        Ok(handles) => return Ok(handles),
                        Err(e) => {
                            warn!(error = %e, backoff_ms = backoff.as_millis(), "connect failed, backing off");
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(AgentError::Connect("cancelled during backoff".into())),
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = std::cmp::min(backoff * 2, self.config.reconnect_max_backoff);
                        }
                    }
                }
            }
        }
    }

    /// `Ready` (spec §4.9): wait for `register_runner`, ack it, extract
    /// params. Other commands received here (e.g. `shutdown`) are honored
    /// immediately; anything else is acked as unknown.
    async fn ready(
        &self,
        in_rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
        out_tx: &mpsc::UnboundedSender<AgentMessage>,
        cancel: &CancellationToken,
    ) -> Result<Option<RegistrationParams>, AgentError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                event = in_rx.recv() => {
                    let event = event.ok_or_else(|| AgentError::Transport("stream closed while waiting for register_runner".into()))?;
                    match event {
                        TransportEvent::Message(ControllerMessage::Command(cmd)) => {
                            match cmd.kind {
                                CommandKind::RegisterRunner => {
                                    let params = RegistrationParams::from_command(&cmd)?;
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "registering")));
                                    return Ok(Some(params));
                                }
                                CommandKind::Shutdown => {
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "shutting down")));
                                    self.emit_event(out_tx, EventKind::VmShuttingDown);
                                    return Ok(None);
                                }
                                _ => {
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::unknown_command(cmd.id)));
                                }
                            }
                        }
                        TransportEvent::Message(ControllerMessage::ErrorNotification(err)) => {
                            warn!(code = %err.code, message = %err.message, "controller error notification");
                        }
                        TransportEvent::Message(ControllerMessage::ConnectAck { .. }) => {
                            warn!("protocol violation: duplicate connect_ack");
                        }
                        TransportEvent::Connected { .. } => {}
                        TransportEvent::Disconnected { reason } => {
                            return Err(AgentError::Transport(format!("disconnected while waiting for register_runner: {reason}")));
                        }
                    }
                }
            }
        }
    }

    /// `RegisteringRunner` (spec §4.9): configure non-interactively, start
    /// the worker, emit `runner_registered`.
    async fn registering_runner(
        &self,
        worker_path: &PathBuf,
        params: &RegistrationParams,
        out_tx: &mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<mpsc::UnboundedReceiver<WorkerEvent>, AgentError> {
        self.worker
            .configure(worker_path, &params.token, &params.url, &params.group, &self.config.vm_id, &params.labels)
            .await?;
        let events = self.worker.start(worker_path).await?;
        self.emit_event(out_tx, EventKind::RunnerRegistered);
        Ok(events)
    }

    /// `Idle`/`JobRunning` (spec §4.9): toggle on worker stdout events,
    /// stream heartbeats, honor `drain`/`shutdown` commands from the
    /// controller until the stream closes or cancellation fires.
    async fn idle_loop(
        &self,
        in_rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
        worker_events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        out_tx: &mpsc::UnboundedSender<AgentMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let mut state = AgentState::Idle;
        let mut current_job: Option<CurrentJobInfo> = None;
        let mut draining = false;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.worker.shutdown().await?;
                    self.emit_event(out_tx, EventKind::VmShuttingDown);
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    self.send_heartbeat(out_tx, state, current_job.clone());
                }
                worker_event = worker_events.recv() => {
                    match worker_event {
                        Some(WorkerEvent::JobStarted { job_id }) => {
                            state = AgentState::JobRunning;
                            current_job = Some(CurrentJobInfo {
                                job_id,
                                run_id: String::new(),
                                repository: String::new(),
                                branch: String::new(),
                                commit: String::new(),
                                status: "running".to_string(),
                                started_at_ms: self.clock.epoch_ms(),
                            });
                            self.emit_event(out_tx, EventKind::JobStarted);
                        }
                        Some(WorkerEvent::JobCompleted { job_id: _, success }) => {
                            state = if draining { AgentState::Draining } else { AgentState::Idle };
                            current_job = None;
                            let ev = EventMessage::new(EventKind::JobCompleted, self.config.vm_id.clone(), self.config.pool_id.clone(), self.clock.epoch_ms())
                                .with_data("success", success.to_string());
                            let _ = out_tx.send(AgentMessage::Event(ev));
                            if draining {
                                self.worker.shutdown().await?;
                                self.emit_event(out_tx, EventKind::VmShuttingDown);
                                return Ok(());
                            }
                        }
                        Some(WorkerEvent::Exited { .. }) => {
                            warn!("worker process exited unexpectedly");
                            let ev = EventMessage::new(EventKind::Other("runner_crashed".to_string()), self.config.vm_id.clone(), self.config.pool_id.clone(), self.clock.epoch_ms());
                            let _ = out_tx.send(AgentMessage::Event(ev));
                            return Err(AgentError::Worker("worker process exited unexpectedly".into()));
                        }
                        None => {
                            return Err(AgentError::Worker("worker event channel closed".into()));
                        }
                    }
                }
                event = in_rx.recv() => {
                    let event = event.ok_or_else(|| AgentError::Transport("stream closed".into()))?;
                    match event {
                        TransportEvent::Message(ControllerMessage::Command(cmd)) => {
                            match cmd.kind {
                                CommandKind::Drain => {
                                    draining = true;
                                    if state == AgentState::Idle {
                                        let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "draining")));
                                        self.worker.shutdown().await?;
                                        self.emit_event(out_tx, EventKind::VmShuttingDown);
                                        return Ok(());
                                    }
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "draining after current job")));
                                    let _ = self.worker.drain().await;
                                }
                                CommandKind::Shutdown => {
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "shutting down")));
                                    self.worker.shutdown().await?;
                                    self.emit_event(out_tx, EventKind::VmShuttingDown);
                                    return Ok(());
                                }
                                CommandKind::UpdateConfig | CommandKind::SetLogLevel => {
                                    // Parameters left open by spec §9; acked as a
                                    // no-op so the controller's command-ack wait
                                    // resolves rather than timing out.
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::success(cmd.id, "applied")));
                                }
                                CommandKind::RegisterRunner => {
                                    let _ = out_tx.send(AgentMessage::CommandAck(CommandAck::failure(cmd.id, "already registered")));
                                }
                            }
                        }
                        TransportEvent::Message(ControllerMessage::ErrorNotification(err)) => {
                            warn!(code = %err.code, message = %err.message, "controller error notification");
                        }
                        TransportEvent::Message(ControllerMessage::ConnectAck { .. }) => {
                            warn!("protocol violation: duplicate connect_ack");
                        }
                        TransportEvent::Connected { .. } => {}
                        TransportEvent::Disconnected { reason } => {
                            return Err(AgentError::Transport(format!("disconnected: {reason}")));
                        }
                    }
                }
            }
        }
    }

    fn send_heartbeat(&self, out_tx: &mpsc::UnboundedSender<AgentMessage>, state: AgentState, current_job: Option<CurrentJobInfo>) {
        if !state.streams_heartbeats() {
            return;
        }
        let msg = HeartbeatMessage {
            vm_id: self.config.vm_id.clone(),
            pool_id: self.config.pool_id.clone(),
            org_id: self.config.org_id.clone(),
            health: HealthMetrics { cpu_pct: 0.0, mem_pct: 0.0 },
            runner_state: HeartbeatRunnerState {
                state: state.wire_name().to_string(),
                configured: true,
                runner_name: Some(self.config.vm_id.clone()),
                labels: Vec::new(),
            },
            current_job,
            timestamp_ms: self.clock.epoch_ms(),
        };
        let _ = out_tx.send(AgentMessage::Heartbeat(msg));
    }

    fn emit_event(&self, out_tx: &mpsc::UnboundedSender<AgentMessage>, kind: EventKind) {
        let ev = EventMessage::new(kind, self.config.vm_id.clone(), self.config.pool_id.clone(), self.clock.epoch_ms());
        let _ = out_tx.send(AgentMessage::Event(ev));
    }
}
