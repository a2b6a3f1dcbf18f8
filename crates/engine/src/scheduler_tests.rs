// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fc_adapters::InstanceInfo;
use fc_core::{AgentHeartbeatState, CommandAck, FakeClock, HealthMetrics, InstallationToken, JobStatus, RegistrationToken, RunnerState};
use fc_storage::InMemoryKv;
use fc_wire::{ControllerMessage, EventKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc::unbounded_channel;

#[derive(Default)]
struct FakeClient {
    target_size: StdMutex<u32>,
}

#[async_trait::async_trait]
impl CloudComputeClient for FakeClient {
    async fn start_instance(&self, _name: &str) -> Result<(), fc_adapters::InfraError> {
        Ok(())
    }
    async fn stop_instance(&self, _name: &str) -> Result<(), fc_adapters::InfraError> {
        Ok(())
    }
    async fn delete_instance(&self, _name: &str) -> Result<(), fc_adapters::InfraError> {
        Ok(())
    }
    async fn group_target_size(&self) -> Result<u32, fc_adapters::InfraError> {
        Ok(*self.target_size.lock().unwrap())
    }
    async fn resize_group(&self, new_target_size: u32) -> Result<(), fc_adapters::InfraError> {
        *self.target_size.lock().unwrap() = new_target_size;
        Ok(())
    }
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>, fc_adapters::InfraError> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct FakeIdentityProvider {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl IdentityProviderClient for FakeIdentityProvider {
    async fn exchange_installation_token(&self, _installation_id: i64, _assertion: &str) -> Result<InstallationToken, fc_adapters::TokenError> {
        Ok(InstallationToken::new("install-tok", 10_000_000))
    }
    async fn mint_registration_token(&self, _installation_token: &str, _owner: &str, _repo: &str) -> Result<RegistrationToken, fc_adapters::TokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(fc_adapters::TokenError::Provider { status: 500, body: "nope".into() });
        }
        Ok(RegistrationToken::new("reg-tok", 10_000_000))
    }
}

struct NoopEventHandler;

#[async_trait::async_trait]
impl EventHandler for NoopEventHandler {
    async fn handle_event(&self, _vm: VmId, _event: EventMessage) {}
}

type TestScheduler = Scheduler<FakeClient, InMemoryKv, FakeIdentityProvider, FakeClock>;

async fn harness(fail_mint: bool) -> (
    TestScheduler,
    Arc<JobStore<InMemoryKv>>,
    Arc<VmStore<InMemoryKv>>,
    Arc<CommandStream<InMemoryKv, FakeClock>>,
    Arc<FakeClient>,
) {
    let client = Arc::new(FakeClient::default());
    let infra = Arc::new(InfraAdapter::new(FakeClientProxy(client.clone()), 10));
    let kv_jobs = Arc::new(InMemoryKv::new());
    let job_store = Arc::new(JobStore::load(kv_jobs, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vm_store = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000);
    let provider = Arc::new(FakeIdentityProvider { fail: fail_mint, calls: AtomicUsize::new(0) });
    let tokens = Arc::new(TokenService::with_algorithm(
        provider,
        clock.clone(),
        "app-1",
        jsonwebtoken::EncodingKey::from_secret(b"secret"),
        jsonwebtoken::Algorithm::HS256,
    ));
    let command_stream = Arc::new(CommandStream::new(vm_store.clone(), clock.clone(), Arc::new(NoopEventHandler)));
    let config = SchedulerConfig { assignment_timeout: Duration::from_millis(200), ..SchedulerConfig::default() };
    let scheduler = Scheduler::new(job_store.clone(), vm_store.clone(), infra, tokens, command_stream.clone(), clock, config, Arc::new(SchedulerStats::new()));
    (scheduler, job_store, vm_store, command_stream, client)
}

#[derive(Clone)]
struct FakeClientProxy(Arc<FakeClient>);

#[async_trait::async_trait]
impl CloudComputeClient for FakeClientProxy {
    async fn start_instance(&self, name: &str) -> Result<(), fc_adapters::InfraError> {
        self.0.start_instance(name).await
    }
    async fn stop_instance(&self, name: &str) -> Result<(), fc_adapters::InfraError> {
        self.0.stop_instance(name).await
    }
    async fn delete_instance(&self, name: &str) -> Result<(), fc_adapters::InfraError> {
        self.0.delete_instance(name).await
    }
    async fn group_target_size(&self) -> Result<u32, fc_adapters::InfraError> {
        self.0.group_target_size().await
    }
    async fn resize_group(&self, new_target_size: u32) -> Result<(), fc_adapters::InfraError> {
        self.0.resize_group(new_target_size).await
    }
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>, fc_adapters::InfraError> {
        self.0.list_instances().await
    }
}

fn job_key(job: i64) -> JobKey {
    JobKey::new(1, job)
}

#[tokio::test]
async fn tick_with_no_jobs_is_idle() {
    let (scheduler, _jobs, _vms, _cs, _client) = harness(false).await;
    assert_eq!(scheduler.tick().await, TickOutcome::Idle);
}

#[tokio::test]
async fn tick_with_no_ready_vm_resizes_and_keeps_job_queued() {
    let (scheduler, jobs, _vms, _cs, client) = harness(false).await;
    jobs.enqueue(job_key(100), "o".into(), "r".into(), vec![], "pool-1".into(), 5, 0).await.unwrap();
    let outcome = scheduler.tick().await;
    assert_eq!(outcome, TickOutcome::Provisioning);
    assert_eq!(*client.target_size.lock().unwrap(), 1);
    assert_eq!(jobs.queue_length(), 1);
}

#[tokio::test]
async fn tick_assigns_queued_job_to_ready_vm() {
    let (scheduler, jobs, vms, cs, _client) = harness(false).await;
    let vm = VmId::new("vm-1");
    vms.update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, 0)
        .await
        .unwrap();
    jobs.enqueue(job_key(100), "acme".into(), "widgets".into(), vec!["linux".into()], "pool-1".into(), 5, 0)
        .await
        .unwrap();

    let (tx, mut rx) = unbounded_channel();
    cs.register_connection(vm.clone(), tx);
    let cs2 = cs.clone();
    let vm2 = vm.clone();
    let responder = tokio::spawn(async move {
        let ControllerMessage::Command(cmd) = rx.recv().await.unwrap() else { panic!("expected command") };
        cs2.handle_agent_message(&vm2, fc_wire::AgentMessage::CommandAck(CommandAck::success(cmd.id, "ok"))).await;
    });

    let outcome = scheduler.tick().await;
    assert_eq!(outcome, TickOutcome::Assigned { job: job_key(100), vm: vm.clone() });
    responder.await.unwrap();

    let job = jobs.get(job_key(100)).unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
    assert_eq!(job.assigned_vm, Some(vm));
}

#[tokio::test]
async fn tick_requeues_job_on_ack_failure() {
    let (scheduler, jobs, vms, cs, _client) = harness(false).await;
    let vm = VmId::new("vm-1");
    vms.update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, 0)
        .await
        .unwrap();
    jobs.enqueue(job_key(100), "acme".into(), "widgets".into(), vec![], "pool-1".into(), 5, 0).await.unwrap();

    let (tx, mut rx) = unbounded_channel();
    cs.register_connection(vm.clone(), tx);
    let cs2 = cs.clone();
    let vm2 = vm.clone();
    let responder = tokio::spawn(async move {
        let ControllerMessage::Command(cmd) = rx.recv().await.unwrap() else { panic!("expected command") };
        cs2.handle_agent_message(&vm2, fc_wire::AgentMessage::CommandAck(CommandAck::failure(cmd.id, "busy"))).await;
    });

    let outcome = scheduler.tick().await;
    responder.await.unwrap();
    assert_eq!(outcome, TickOutcome::Requeued { job: job_key(100) });
    let job = jobs.get(job_key(100)).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn tick_requeues_job_when_token_mint_fails() {
    let (scheduler, jobs, vms, _cs, _client) = harness(true).await;
    let vm = VmId::new("vm-1");
    vms.update_from_heartbeat(vm.clone(), AgentHeartbeatState::Idle, RunnerState::Idle, HealthMetrics::default(), None, 0)
        .await
        .unwrap();
    jobs.enqueue(job_key(100), "acme".into(), "widgets".into(), vec![], "pool-1".into(), 5, 0).await.unwrap();

    let outcome = scheduler.tick().await;
    assert_eq!(outcome, TickOutcome::Requeued { job: job_key(100) });
}

fn event_handler(jobs: Arc<JobStore<InMemoryKv>>, vms: Arc<VmStore<InMemoryKv>>, clock: FakeClock) -> SchedulerEventHandler<InMemoryKv, FakeClock> {
    SchedulerEventHandler::new(jobs, vms, clock)
}

#[tokio::test]
async fn job_started_event_transitions_assigned_to_running() {
    let kv = Arc::new(InMemoryKv::new());
    let jobs = Arc::new(JobStore::load(kv, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vms = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let vm = VmId::new("vm-1");
    jobs.enqueue(job_key(1), "o".into(), "r".into(), vec![], "pool-1".into(), 1, 0).await.unwrap();
    jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();

    let handler = event_handler(jobs.clone(), vms, FakeClock::new());
    handler.handle_event(vm, EventMessage::new(EventKind::JobStarted, "vm-1", "pool-1", 0)).await;

    assert_eq!(jobs.get(job_key(1)).unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn job_completed_success_marks_completed() {
    let kv = Arc::new(InMemoryKv::new());
    let jobs = Arc::new(JobStore::load(kv, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vms = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let vm = VmId::new("vm-1");
    jobs.enqueue(job_key(1), "o".into(), "r".into(), vec![], "pool-1".into(), 1, 0).await.unwrap();
    jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();
    jobs.mark_running(job_key(1), 0).await.unwrap();

    let handler = event_handler(jobs.clone(), vms, FakeClock::new());
    let event = EventMessage::new(EventKind::JobCompleted, "vm-1", "pool-1", 0).with_data("success", "true");
    handler.handle_event(vm, event).await;

    assert_eq!(jobs.get(job_key(1)).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn job_completed_failure_marks_failed() {
    let kv = Arc::new(InMemoryKv::new());
    let jobs = Arc::new(JobStore::load(kv, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vms = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let vm = VmId::new("vm-1");
    jobs.enqueue(job_key(1), "o".into(), "r".into(), vec![], "pool-1".into(), 1, 0).await.unwrap();
    jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();
    jobs.mark_running(job_key(1), 0).await.unwrap();

    let handler = event_handler(jobs.clone(), vms, FakeClock::new());
    let event = EventMessage::new(EventKind::JobCompleted, "vm-1", "pool-1", 0).with_data("success", "false");
    handler.handle_event(vm, event).await;

    assert_eq!(jobs.get(job_key(1)).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn runner_crashed_requeues_when_retries_remain() {
    let kv = Arc::new(InMemoryKv::new());
    let jobs = Arc::new(JobStore::load(kv, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vms = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let vm = VmId::new("vm-1");
    jobs.enqueue(job_key(1), "o".into(), "r".into(), vec![], "pool-1".into(), 1, 0).await.unwrap();
    jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();
    jobs.mark_running(job_key(1), 0).await.unwrap();

    let handler = event_handler(jobs.clone(), vms, FakeClock::new());
    handler.handle_event(vm, EventMessage::new(EventKind::RunnerCrashed, "vm-1", "pool-1", 0)).await;

    let job = jobs.get(job_key(1)).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);
    assert!(job.assigned_vm.is_none());
}

#[tokio::test]
async fn runner_crashed_fails_job_when_retries_exhausted() {
    let kv = Arc::new(InMemoryKv::new());
    let jobs = Arc::new(JobStore::load(kv, "pool-1").await.unwrap());
    let kv_vms = Arc::new(InMemoryKv::new());
    let vms = Arc::new(VmStore::load(kv_vms, "pool-1").await.unwrap());
    let vm = VmId::new("vm-1");
    jobs.enqueue(job_key(1), "o".into(), "r".into(), vec![], "pool-1".into(), 1, 0).await.unwrap();
    // Exhaust retries by requeuing/reassigning up to max_retries (3).
    for _ in 0..3 {
        jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();
        jobs.requeue(job_key(1), 0).await.unwrap();
    }
    jobs.assign_to_vm(job_key(1), vm.clone(), 0).await.unwrap();
    jobs.mark_running(job_key(1), 0).await.unwrap();

    let handler = event_handler(jobs.clone(), vms, FakeClock::new());
    handler.handle_event(vm, EventMessage::new(EventKind::RunnerCrashed, "vm-1", "pool-1", 0)).await;

    assert_eq!(jobs.get(job_key(1)).unwrap().status, JobStatus::Failed);
}
