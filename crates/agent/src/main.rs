// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fleet-agent` binary entry point: loads config from the environment,
//! wires the real installer/transport/worker implementations into
//! [`fleet_agent::AgentCore`], and runs until a process signal or a
//! terminal `Error` state (spec §4.9 — the process supervisor restarts
//! the agent on exit, re-entering `Initializing`).

use std::process::ExitCode;
use std::sync::Arc;

use fc_core::SystemClock;
use fleet_agent::config::AgentConfig;
use fleet_agent::core::AgentCore;
use fleet_agent::install::HttpInstaller;
use fleet_agent::transport::WebSocketTransport;
use fleet_agent::worker::ProcessWorkerSupervisor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            // Fatal startup per spec §7: missing required config -> exit non-zero.
            eprintln!("fleet-agent: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(vm_id = %config.vm_id, pool_id = %config.pool_id, "fleet-agent starting");

    let installer = Arc::new(HttpInstaller::new(config.install_dir.clone()));
    let transport = Arc::new(WebSocketTransport::new(&config.controller_url));
    let worker = Arc::new(ProcessWorkerSupervisor::new());
    let core = AgentCore::new(config, installer, transport, worker, SystemClock);

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_cancel.cancel();
        }
    });

    match core.run(cancel).await {
        Ok(()) => {
            info!("fleet-agent exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fleet-agent terminated with error");
            ExitCode::FAILURE
        }
    }
}
