// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenario tests (spec §8 "End-to-end scenarios").
//!
//! Unlike the per-crate unit tests, these wire a full controller stack —
//! `JobStore`, `VmStore`, `InfraAdapter`, `TokenService`, `CommandStream`,
//! `Scheduler`, `VmManager`, and `Ingress` — together the way `fleetd`'s
//! `main.rs` does, and drive it through the six scenarios named in the
//! spec (S1-S6).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fc_adapters::{
    CloudComputeClient, FakeBusClient, FakeCloudComputeClient, FakeIdentityProviderClient, InfraAdapter,
    InfraError, InstanceInfo, TokenService,
};
use fc_core::{
    AgentHeartbeatState, Clock, CommandAck, EffectiveState, FakeClock, HealthMetrics, InfraState, JobKey,
    JobStatus, RunnerState, VmId,
};
use fc_engine::{
    CommandStream, Ingress, Scheduler, SchedulerConfig, SchedulerEventHandler, SchedulerStats, TickOutcome,
    VmManager, VmManagerConfig,
};
use fc_storage::{InMemoryKv, JobStore, VmStore};
use fc_wire::ControllerMessage;
use jsonwebtoken::{Algorithm, EncodingKey};
use tokio::sync::mpsc::unbounded_channel;

const POOL: &str = "pool-1";

/// Forwards to a shared [`FakeCloudComputeClient`] so tests can hold a
/// handle to assert on (e.g. `target_size`) after handing a client to
/// `InfraAdapter::new`, which otherwise takes ownership.
#[derive(Clone)]
struct CloudHandle(Arc<FakeCloudComputeClient>);

#[async_trait]
impl CloudComputeClient for CloudHandle {
    async fn start_instance(&self, name: &str) -> Result<(), InfraError> {
        self.0.start_instance(name).await
    }
    async fn stop_instance(&self, name: &str) -> Result<(), InfraError> {
        self.0.stop_instance(name).await
    }
    async fn delete_instance(&self, name: &str) -> Result<(), InfraError> {
        self.0.delete_instance(name).await
    }
    async fn group_target_size(&self) -> Result<u32, InfraError> {
        self.0.group_target_size().await
    }
    async fn resize_group(&self, new_target_size: u32) -> Result<(), InfraError> {
        self.0.resize_group(new_target_size).await
    }
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>, InfraError> {
        self.0.list_instances().await
    }
}

type TestScheduler = Scheduler<CloudHandle, InMemoryKv, FakeIdentityProviderClient, FakeClock>;
type TestVmManager = VmManager<CloudHandle, InMemoryKv, FakeClock>;

struct Harness {
    jobs: Arc<JobStore<InMemoryKv>>,
    vms: Arc<VmStore<InMemoryKv>>,
    cloud: Arc<FakeCloudComputeClient>,
    identity: Arc<FakeIdentityProviderClient>,
    command_stream: Arc<CommandStream<InMemoryKv, FakeClock>>,
    scheduler: TestScheduler,
    vm_manager: TestVmManager,
    bus: Arc<FakeBusClient>,
    ingress: Ingress<FakeBusClient, InMemoryKv, FakeClock>,
    clock: FakeClock,
}

async fn harness(scheduler_config: SchedulerConfig, vm_manager_config: VmManagerConfig) -> Harness {
    let jobs = Arc::new(JobStore::load(Arc::new(InMemoryKv::new()), POOL).await.unwrap());
    let vms = Arc::new(VmStore::load(Arc::new(InMemoryKv::new()), POOL).await.unwrap());

    let cloud = Arc::new(FakeCloudComputeClient::new());
    let infra = Arc::new(InfraAdapter::new(CloudHandle(cloud.clone()), 10));

    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000);

    let identity = Arc::new(FakeIdentityProviderClient::new());
    let tokens = Arc::new(TokenService::with_algorithm(
        identity.clone(),
        clock.clone(),
        "app-1",
        EncodingKey::from_secret(b"test-secret"),
        Algorithm::HS256,
    ));

    let event_handler = Arc::new(SchedulerEventHandler::new(jobs.clone(), vms.clone(), clock.clone()));
    let command_stream = Arc::new(CommandStream::new(vms.clone(), clock.clone(), event_handler));

    let scheduler = Scheduler::new(
        jobs.clone(),
        vms.clone(),
        infra.clone(),
        tokens,
        command_stream.clone(),
        clock.clone(),
        scheduler_config,
        Arc::new(SchedulerStats::new()),
    );
    let vm_manager = VmManager::new(infra, vms.clone(), clock.clone(), vm_manager_config);

    let bus = Arc::new(FakeBusClient::new());
    let ingress = Ingress::new(bus.clone(), jobs.clone(), clock.clone(), POOL);

    Harness { jobs, vms, cloud, identity, command_stream, scheduler, vm_manager, bus, ingress, clock }
}

fn job_payload(installation: i64, job: i64, owner: &str, repo: &str, labels: &[&str], priority: i32) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "installation": installation,
        "job": job,
        "owner": owner,
        "repo": repo,
        "labels": labels,
        "priority": priority,
    }))
    .unwrap()
}

/// Drives one ack: the agent acks whatever command it receives on `rx` with
/// the given success/message, as if a connected agent were replying.
async fn auto_ack(
    command_stream: Arc<CommandStream<InMemoryKv, FakeClock>>,
    vm: VmId,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ControllerMessage>,
    success: bool,
) {
    let Some(ControllerMessage::Command(cmd)) = rx.recv().await else {
        panic!("expected a Command message");
    };
    let ack = if success {
        CommandAck::success(cmd.id, "ok")
    } else {
        CommandAck::failure(cmd.id, "agent busy")
    };
    command_stream.handle_agent_message(&vm, fc_wire::AgentMessage::CommandAck(ack)).await;
}

// ---------------------------------------------------------------------
// S1 - Happy path, warm VM.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s1_happy_path_warm_vm() {
    let h = harness(SchedulerConfig::default(), VmManagerConfig::default()).await;

    let vm = VmId::new("vm-1");
    h.vms
        .update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, h.clock.epoch_ms())
        .await
        .unwrap();

    let msg = fc_adapters::BusMessage {
        ack_id: "a1".into(),
        payload: job_payload(1, 100, "o", "r", &["self-hosted", "linux"], 5),
    };
    let outcome = h.ingress.process(&msg).await;
    assert_eq!(outcome, fc_engine::IngressOutcome::Enqueued(JobKey::new(1, 100)));

    let (tx, rx) = unbounded_channel();
    h.command_stream.register_connection(vm.clone(), tx);
    let responder = tokio::spawn(auto_ack(h.command_stream.clone(), vm.clone(), rx, true));

    let tick = h.scheduler.tick().await;
    responder.await.unwrap();

    assert_eq!(tick, TickOutcome::Assigned { job: JobKey::new(1, 100), vm: vm.clone() });
    let job = h.jobs.get(JobKey::new(1, 100)).unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
    assert_eq!(job.assigned_vm, Some(vm));
    assert_eq!(job.labels, vec!["self-hosted".to_string(), "linux".to_string()]);
    assert_eq!(h.identity.mint_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------
// S2 - Cold start: no VMs, two jobs arrive, first tick resizes, both stay
// queued; as VMs come up the jobs are assigned one per tick. No token is
// minted until a VM reaches READY/IDLE.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s2_cold_start_two_jobs_no_vms() {
    let h = harness(SchedulerConfig::default(), VmManagerConfig::default()).await;

    for (job, priority) in [(100, 5), (101, 5)] {
        let msg = fc_adapters::BusMessage { ack_id: format!("a{job}"), payload: job_payload(1, job, "o", "r", &[], priority) };
        h.ingress.process(&msg).await;
    }
    assert_eq!(h.jobs.queue_length(), 2);

    let tick = h.scheduler.tick().await;
    assert_eq!(tick, TickOutcome::Provisioning);
    assert_eq!(h.cloud.target_size(), 1);
    assert_eq!(h.jobs.queue_length(), 2);
    assert_eq!(h.identity.mint_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // A VM comes up and reports ready.
    let vm1 = VmId::new("vm-1");
    h.vms
        .update_from_heartbeat(vm1.clone(), AgentHeartbeatState::Ready, RunnerState::Idle, HealthMetrics::default(), None, h.clock.epoch_ms())
        .await
        .unwrap();
    let (tx1, rx1) = unbounded_channel();
    h.command_stream.register_connection(vm1.clone(), tx1);
    let responder1 = tokio::spawn(auto_ack(h.command_stream.clone(), vm1.clone(), rx1, true));

    let tick = h.scheduler.tick().await;
    responder1.await.unwrap();
    let TickOutcome::Assigned { job, vm } = tick else { panic!("expected assignment, got {tick:?}") };
    assert_eq!(job, JobKey::new(1, 100));
    assert_eq!(vm, vm1);
    assert_eq!(h.jobs.queue_length(), 1);

    // Second VM comes up; second job is assigned on a later tick.
    let vm2 = VmId::new("vm-2");
    h.vms
        .update_from_heartbeat(vm2.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, h.clock.epoch_ms())
        .await
        .unwrap();
    let (tx2, rx2) = unbounded_channel();
    h.command_stream.register_connection(vm2.clone(), tx2);
    let responder2 = tokio::spawn(auto_ack(h.command_stream.clone(), vm2.clone(), rx2, true));

    let tick = h.scheduler.tick().await;
    responder2.await.unwrap();
    assert_eq!(tick, TickOutcome::Assigned { job: JobKey::new(1, 101), vm: vm2 });
    assert_eq!(h.jobs.queue_length(), 0);
}

// ---------------------------------------------------------------------
// S3 - Duplicate ingestion.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s3_duplicate_ingestion_is_a_noop_after_the_first() {
    let h = harness(SchedulerConfig::default(), VmManagerConfig::default()).await;
    let payload = job_payload(1, 100, "o", "r", &[], 5);

    for ack_id in ["a1", "a2", "a3"] {
        let msg = fc_adapters::BusMessage { ack_id: ack_id.into(), payload: payload.clone() };
        h.ingress.process(&msg).await;
    }

    assert_eq!(h.jobs.queue_length(), 1);
    assert_eq!(h.bus.acked(), vec!["a1".to_string(), "a2".to_string(), "a3".to_string()]);
}

// ---------------------------------------------------------------------
// S4 - Agent crash after assignment.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s4_runner_crash_requeues_with_retry_count_incremented() {
    let h = harness(SchedulerConfig::default(), VmManagerConfig::default()).await;
    let vm = VmId::new("vm-1");
    h.vms
        .update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, h.clock.epoch_ms())
        .await
        .unwrap();

    let msg = fc_adapters::BusMessage { ack_id: "a1".into(), payload: job_payload(1, 100, "o", "r", &[], 5) };
    h.ingress.process(&msg).await;

    let (tx, rx) = unbounded_channel();
    h.command_stream.register_connection(vm.clone(), tx);
    let responder = tokio::spawn(auto_ack(h.command_stream.clone(), vm.clone(), rx, true));
    h.scheduler.tick().await;
    responder.await.unwrap();

    h.jobs.mark_running(JobKey::new(1, 100), h.clock.epoch_ms()).await.unwrap();
    assert_eq!(h.jobs.get(JobKey::new(1, 100)).unwrap().retry_count, 0);

    let handler = SchedulerEventHandler::new(h.jobs.clone(), h.vms.clone(), h.clock.clone());
    handler
        .handle_event(vm, fc_wire::EventMessage::new(fc_wire::EventKind::RunnerCrashed, "vm-1", POOL, h.clock.epoch_ms()))
        .await;

    let job = h.jobs.get(JobKey::new(1, 100)).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);
    assert!(job.assigned_vm.is_none());
    assert_eq!(h.jobs.queue_length(), 1);
}

// ---------------------------------------------------------------------
// S5 - Command ack timeout: the agent never acks register_runner; the
// scheduler requeues on timeout, and a later attempt (here, against the
// same VM once it does respond) completes the job.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s5_command_ack_timeout_then_later_success() {
    let mut config = SchedulerConfig::default();
    config.command_timeout = Duration::from_millis(50);
    let h = harness(config, VmManagerConfig::default()).await;

    let vm = VmId::new("vm-1");
    h.vms
        .update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, h.clock.epoch_ms())
        .await
        .unwrap();
    let msg = fc_adapters::BusMessage { ack_id: "a1".into(), payload: job_payload(1, 100, "o", "r", &[], 5) };
    h.ingress.process(&msg).await;

    // Agent connects but never acks.
    let (tx, _rx) = unbounded_channel();
    h.command_stream.register_connection(vm.clone(), tx);

    let tick = h.scheduler.tick().await;
    assert_eq!(tick, TickOutcome::Requeued { job: JobKey::new(1, 100) });
    let job = h.jobs.get(JobKey::new(1, 100)).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);

    // VM remains READY/IDLE under observation; a later tick, with the
    // agent now responding, completes the assignment.
    let status = h.vms.get(&vm).unwrap();
    assert_eq!(status.effective_state(), EffectiveState::Idle);

    let (tx2, rx2) = unbounded_channel();
    h.command_stream.register_connection(vm.clone(), tx2);
    let responder = tokio::spawn(auto_ack(h.command_stream.clone(), vm.clone(), rx2, true));
    let tick = h.scheduler.tick().await;
    responder.await.unwrap();
    assert_eq!(tick, TickOutcome::Assigned { job: JobKey::new(1, 100), vm });
}

// ---------------------------------------------------------------------
// S6 - Idle reap respects the warm pool minimum.
// ---------------------------------------------------------------------
#[tokio::test]
async fn s6_idle_reap_respects_warm_pool_minimum() {
    let mut vm_manager_config = VmManagerConfig::default();
    vm_manager_config.min_ready_vms = 2;
    vm_manager_config.idle_timeout_ms = 5_000;
    let h = harness(SchedulerConfig::default(), vm_manager_config).await;

    for i in 0..4 {
        let name = format!("vm-{i}");
        h.cloud.seed_instance(name.clone(), "us-central1-a", InfraState::Running);
        h.vms
            .update_from_heartbeat(
                VmId::new(name),
                AgentHeartbeatState::Idle,
                RunnerState::Idle,
                HealthMetrics::default(),
                None,
                h.clock.epoch_ms(),
            )
            .await
            .unwrap();
    }
    h.clock.advance(Duration::from_secs(60));

    h.vm_manager.idle_reap_tick().await.unwrap();

    let remaining = h.vms.get_by_effective_state(EffectiveState::Idle);
    assert_eq!(remaining.len(), 2);

    let instances = h.cloud.list_instances().await.unwrap();
    let stopping = instances.iter().filter(|i| i.infra_state == InfraState::Stopping).count();
    assert_eq!(stopping, 2, "exactly two surplus idle vms should be stopped, not deleted");
}
