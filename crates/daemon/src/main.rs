// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fleetd` binary entry point: loads config, wires one pool's stores,
//! adapters, and controller loops, and serves the HTTP/WebSocket edge
//! until a process signal (spec §4, §5, §6).

use std::process::ExitCode;
use std::sync::Arc;

use fc_adapters::{FakeBusClient, FakeCloudComputeClient, FakeIdentityProviderClient, InfraAdapter, TokenService};
use fc_core::SystemClock;
use fc_engine::{CommandStream, Ingress, Scheduler, SchedulerConfig, SchedulerEventHandler, SchedulerStats, VmManager, VmManagerConfig};
use fc_storage::{InMemoryKv, JobStore, VmStore};
use fleetd::config::Config;
use fleetd::http;
use fleetd::state::AppState;
use jsonwebtoken::{Algorithm, EncodingKey};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fleetd: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fleetd terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let clock = SystemClock;
    let kv = Arc::new(InMemoryKv::new());

    let job_store = Arc::new(JobStore::load(kv.clone(), config.pool_id.clone()).await?);
    let vm_store = Arc::new(VmStore::load(kv.clone(), config.pool_id.clone()).await?);

    let cloud_client = FakeCloudComputeClient::new();
    let infra = Arc::new(InfraAdapter::new(cloud_client, config.max_vms));

    let identity_client = Arc::new(FakeIdentityProviderClient::new());
    let signing_key = EncodingKey::from_secret(config.identity_signing_secret.as_bytes());
    let tokens = Arc::new(TokenService::with_algorithm(
        identity_client,
        clock.clone(),
        config.identity_app_id.clone(),
        signing_key,
        Algorithm::HS256,
    ));

    let event_handler = Arc::new(SchedulerEventHandler::new(job_store.clone(), vm_store.clone(), clock.clone()));
    let command_stream = Arc::new(CommandStream::new(vm_store.clone(), clock.clone(), event_handler));

    let stats = Arc::new(SchedulerStats::new());
    let scheduler_config = SchedulerConfig {
        tick_interval: config.scheduler_tick_interval,
        assignment_timeout: config.assignment_timeout,
        command_timeout: config.command_timeout,
        runner_url: config.runner_url.clone(),
        runner_group: config.runner_group.clone(),
    };
    let scheduler = Arc::new(Scheduler::new(
        job_store.clone(),
        vm_store.clone(),
        infra.clone(),
        tokens.clone(),
        command_stream.clone(),
        clock.clone(),
        scheduler_config,
        stats.clone(),
    ));

    let vm_manager_config = VmManagerConfig {
        reconcile_interval: config.reconcile_interval,
        warm_pool_interval: config.warm_pool_interval,
        idle_reap_interval: config.idle_reap_interval,
        min_ready_vms: config.min_ready_vms,
        max_scale_up_per_minute: config.max_scale_up_per_minute,
        idle_timeout_ms: config.idle_timeout_ms,
    };
    let vm_manager = Arc::new(VmManager::new(infra.clone(), vm_store.clone(), clock.clone(), vm_manager_config));

    let bus = Arc::new(FakeBusClient::new());
    let ingress = Arc::new(Ingress::new(bus, job_store.clone(), clock.clone(), config.pool_id.clone()));

    let state = AppState {
        config: config.clone(),
        job_store,
        vm_store,
        infra,
        tokens,
        command_stream,
        stats,
        clock,
    };

    let cancel = CancellationToken::new();

    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));
    let vm_manager_task = tokio::spawn(vm_manager.run(cancel.clone()));
    let ingress_task = tokio::spawn(ingress.run(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, pool_id = %config.pool_id, "fleetd listening");

    let app = http::router(state);
    let server_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            cancel.cancel();
        }
    }

    cancel.cancel();
    let _ = tokio::join!(scheduler_task, vm_manager_task, ingress_task);
    Ok(())
}
