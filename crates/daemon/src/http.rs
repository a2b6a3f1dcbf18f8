// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon's HTTP surface: health/readiness/stats (spec §6 "operational
//! endpoints") and the `/v1/stream` WebSocket upgrade that is the
//! controller side of `CommandStream` (spec §4.5).

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fc_core::VmId;
use fc_wire::{AgentMessage, ConnectRequest, ControllerMessage};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::AppState;

/// Server pings the agent on this cadence (spec §4.5 "pings periodically
/// (on the order of seconds)"); a stream silent for three intervals is
/// presumed dead and closed.
const PING_INTERVAL: Duration = Duration::from_secs(15);
const PING_MISS_LIMIT: u32 = 3;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .route("/v1/stream", get(stream_upgrade))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ready"
}

#[derive(Serialize)]
struct StatsResponse {
    scheduler: fc_engine::SchedulerStatsSnapshot,
    vms: fc_storage::VmStoreStats,
    queued_jobs: usize,
    connected_agents: usize,
    pending_acks: usize,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        scheduler: state.stats.snapshot(),
        vms: state.vm_store.get_stats(),
        queued_jobs: state.job_store.queue_length(),
        connected_agents: state.command_stream.connected_count(),
        pending_acks: state.command_stream.pending_ack_count(),
    })
}

async fn stream_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// Drives one agent's `/v1/stream` socket end to end: the `Connect`
/// handshake, then the steady-state read/write loop until either side
/// closes (spec §4.5).
async fn handle_stream(mut socket: WebSocket, state: AppState) {
    let vm = match do_handshake(&mut socket, &state).await {
        Some(vm) => vm,
        None => return,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ControllerMessage>();
    let queued = state.command_stream.register_connection(vm.clone(), tx);
    for command in queued {
        if send_frame(&mut socket, &ControllerMessage::Command(command)).await.is_err() {
            state.command_stream.unregister_connection(&vm).await;
            return;
        }
    }

    let mut last_pong = Instant::now();
    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    let mut missed_pings: u32 = 0;

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if missed_pings >= PING_MISS_LIMIT {
                    warn!(%vm, "agent unresponsive to pings; closing stream");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                if last_pong.elapsed() >= PING_INTERVAL {
                    missed_pings += 1;
                }
            }
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                if send_frame(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        missed_pings = 0;
                        match serde_json::from_str::<AgentMessage>(&text) {
                            Ok(message) => state.command_stream.handle_agent_message(&vm, message).await,
                            Err(e) => warn!(%vm, error = %e, "dropping malformed agent frame"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        missed_pings = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%vm, error = %e, "stream error");
                        break;
                    }
                }
            }
        }
    }

    state.command_stream.unregister_connection(&vm).await;
    info!(%vm, "agent stream closed");
}

/// Expects the first frame to be an `AgentMessage::Connect`, validates it
/// against this daemon's pool, and replies with a `ConnectAck` (spec
/// §4.5 "first agent message must be a ConnectRequest").
async fn do_handshake(socket: &mut WebSocket, state: &AppState) -> Option<VmId> {
    let first = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            warn!("stream closed before a connect request arrived");
            return None;
        }
    };

    let message: AgentMessage = match serde_json::from_str(&first) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "malformed first frame, expected connect request");
            let _ = send_frame(socket, &ControllerMessage::reject("malformed connect request", env!("CARGO_PKG_VERSION"))).await;
            return None;
        }
    };

    let request: ConnectRequest = match message {
        AgentMessage::Connect(request) => request,
        other => {
            warn!(?other, "protocol violation: first message was not Connect");
            let _ = send_frame(socket, &ControllerMessage::reject("connect must be the first message", env!("CARGO_PKG_VERSION"))).await;
            return None;
        }
    };

    if request.pool_id != state.config.pool_id {
        warn!(vm_id = %request.vm_id, pool = %request.pool_id, "connect request for a different pool");
        let _ = send_frame(
            socket,
            &ControllerMessage::reject(
                format!("pool mismatch: this controller serves {}", state.config.pool_id),
                env!("CARGO_PKG_VERSION"),
            ),
        )
        .await;
        return None;
    }

    let ack = ControllerMessage::accept(env!("CARGO_PKG_VERSION"));
    if send_frame(socket, &ack).await.is_err() {
        return None;
    }

    info!(vm_id = %request.vm_id, version = %request.version, "agent connected");
    Some(VmId::new(request.vm_id))
}

async fn send_frame<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}
