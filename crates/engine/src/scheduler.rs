// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler: the single tick-driven loop that matches jobs to VMs and
//! drives provisioning (spec §4.7). Bounded to at most one job per tick,
//! which naturally rate-limits token minting and command emission.

use std::sync::Arc;
use std::time::Duration;

use fc_adapters::{CloudComputeClient, IdentityProviderClient, InfraAdapter, TokenService};
use fc_core::{Clock, Command, EffectiveState, JobKey, VmId};
use fc_storage::{JobStore, KvStore, VmStore};
use fc_wire::EventMessage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command_stream::{CommandStream, EventHandler};
use crate::stats::SchedulerStats;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How long to wait for a freshly started VM to reach `READY`/`IDLE`
    /// before giving up on this tick's assignment attempt (spec §4.7 step 3a).
    pub assignment_timeout: Duration,
    /// `SendCommand(vm, cmd, timeout)` timeout for `register_runner`
    /// (spec §4.7 step 4d: "30s").
    pub command_timeout: Duration,
    pub runner_url: String,
    pub runner_group: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            assignment_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(30),
            runner_url: String::new(),
            runner_group: "default".to_string(),
        }
    }
}

/// What one `tick()` accomplished, surfaced for tests and `/stats`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No queued job.
    Idle,
    /// A job was assigned to a VM.
    Assigned { job: JobKey, vm: VmId },
    /// No ready VM existed; a stopped one was started or the group was
    /// resized. The job remains queued for a later tick.
    Provisioning,
    /// A VM reached `READY` but the registration command failed or timed
    /// out; the job was requeued.
    Requeued { job: JobKey },
}

pub struct Scheduler<Cc: CloudComputeClient, K: KvStore, Ic: IdentityProviderClient, Ck: Clock> {
    job_store: Arc<JobStore<K>>,
    vm_store: Arc<VmStore<K>>,
    infra: Arc<InfraAdapter<Cc>>,
    tokens: Arc<TokenService<Ic, Ck>>,
    command_stream: Arc<CommandStream<K, Ck>>,
    clock: Ck,
    config: SchedulerConfig,
    stats: Arc<SchedulerStats>,
}

impl<Cc: CloudComputeClient, K: KvStore, Ic: IdentityProviderClient, Ck: Clock> Scheduler<Cc, K, Ic, Ck> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_store: Arc<JobStore<K>>,
        vm_store: Arc<VmStore<K>>,
        infra: Arc<InfraAdapter<Cc>>,
        tokens: Arc<TokenService<Ic, Ck>>,
        command_stream: Arc<CommandStream<K, Ck>>,
        clock: Ck,
        config: SchedulerConfig,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self { job_store, vm_store, infra, tokens, command_stream, clock, config, stats }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken)
    where
        Cc: 'static,
        K: 'static,
        Ic: 'static,
        Ck: 'static,
    {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.tick().await;
                }
            }
        }
    }

    /// One scheduler tick (spec §4.7). Returns what it accomplished.
    pub async fn tick(&self) -> TickOutcome {
        self.stats.record_tick();
        let Some(job) = self.job_store.peek() else {
            return TickOutcome::Idle;
        };

        let vm = match self.vm_store.get_first_ready() {
            Some(vm) => vm,
            None => return self.provision(&job.key).await,
        };

        self.assign(job.key, vm.vm).await
    }

    async fn provision(&self, job: &JobKey) -> TickOutcome {
        if let Some(stopped) = self.vm_store.get_first_stopped() {
            if let Err(e) = self.infra.start_vm(stopped.vm.as_str()).await {
                warn!(vm = %stopped.vm, error = %e, "failed to start vm for provisioning");
                return TickOutcome::Provisioning;
            }
            let now_ms = self.clock.epoch_ms();
            self.vm_store
                .update_from_infra(stopped.vm.clone(), stopped.zone.clone(), fc_core::InfraState::Staging, now_ms)
                .await
                .ok();

            if let Some(ready_vm) = self.wait_for_ready(&stopped.vm).await {
                return self.assign(*job, ready_vm.vm).await;
            }
            info!(vm = %stopped.vm, "vm did not reach ready within assignment timeout");
            return TickOutcome::Provisioning;
        }

        match self.infra.resize(1).await {
            Ok(new_size) => info!(new_target_size = new_size, "resized managed group; job remains queued"),
            Err(e) => warn!(error = %e, "resize failed while provisioning"),
        }
        TickOutcome::Provisioning
    }

    async fn wait_for_ready(&self, vm: &VmId) -> Option<fc_core::VmStatus> {
        let deadline = tokio::time::Instant::now() + self.config.assignment_timeout;
        let poll_interval = Duration::from_millis(250);
        loop {
            if let Some(status) = self.vm_store.get(vm) {
                if matches!(status.effective_state(), EffectiveState::Ready | EffectiveState::Idle) {
                    return Some(status);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Assignment step (spec §4.7 step 4): dequeue, mint a token, build
    /// `register_runner`, send it, commit or requeue on the outcome.
    async fn assign(&self, key: JobKey, vm: VmId) -> TickOutcome {
        let Some(job) = self.job_store.dequeue() else {
            return TickOutcome::Idle;
        };
        if job.key != key {
            // Another path already took the head of the queue (e.g. a
            // concurrent scheduler worker, spec §4.7 "implementations may
            // raise this bound"); put it back for its own turn and bail.
            self.job_store.requeue(job.key, self.clock.epoch_ms()).await.ok();
            return TickOutcome::Idle;
        }

        let now_ms = self.clock.epoch_ms();
        let token = match self.tokens.registration_token(job.key.installation, &job.owner, &job.repo).await {
            Ok(token) => token,
            Err(e) => {
                warn!(job = %job.key, error = %e, "failed to mint registration token");
                self.job_store.requeue(job.key, now_ms).await.ok();
                self.stats.record_requeue();
                return TickOutcome::Requeued { job: job.key };
            }
        };

        let command = Command::register_runner(
            token.reveal(),
            &self.config.runner_url,
            &self.config.runner_group,
            vm.as_str(),
            job.labels.clone(),
            now_ms,
        );

        match self.command_stream.send_command(&vm, command, self.config.command_timeout).await {
            Ok(ack) if ack.success => {
                self.job_store.assign_to_vm(job.key, vm.clone(), self.clock.epoch_ms()).await.ok();
                self.stats.record_assignment();
                info!(job = %job.key, %vm, "job assigned");
                TickOutcome::Assigned { job: job.key, vm }
            }
            Ok(ack) => {
                warn!(job = %job.key, %vm, message = %ack.message, "register_runner ack reported failure");
                self.job_store.requeue(job.key, self.clock.epoch_ms()).await.ok();
                self.stats.record_requeue();
                TickOutcome::Requeued { job: job.key }
            }
            Err(e) => {
                warn!(job = %job.key, %vm, error = %e, "register_runner send failed");
                self.job_store.requeue(job.key, self.clock.epoch_ms()).await.ok();
                self.stats.record_requeue();
                TickOutcome::Requeued { job: job.key }
            }
        }
    }
}

/// The Scheduler's event callback (spec §4.7 "Event callback from
/// CommandStream"). A thin `EventHandler` so `CommandStream` stays
/// decoupled from scheduling policy.
pub struct SchedulerEventHandler<K: KvStore, Ck: Clock> {
    job_store: Arc<JobStore<K>>,
    vm_store: Arc<VmStore<K>>,
    clock: Ck,
}

impl<K: KvStore, Ck: Clock> SchedulerEventHandler<K, Ck> {
    pub fn new(job_store: Arc<JobStore<K>>, vm_store: Arc<VmStore<K>>, clock: Ck) -> Self {
        Self { job_store, vm_store, clock }
    }
}

#[async_trait::async_trait]
impl<K: KvStore, Ck: Clock> EventHandler for SchedulerEventHandler<K, Ck> {
    async fn handle_event(&self, vm: VmId, event: EventMessage) {
        let now_ms = self.clock.epoch_ms();
        match event.kind.as_str() {
            "runner_registered" => {
                info!(%vm, "runner registered (informational)");
            }
            "job_started" => {
                if let Some(job) = self.job_store.get_by_vm(&vm) {
                    if let Err(e) = self.job_store.mark_running(job.key, now_ms).await {
                        warn!(job = %job.key, error = %e, "failed to mark job running");
                    }
                }
            }
            "job_completed" => {
                if let Some(job) = self.job_store.get_by_vm(&vm) {
                    let result = if event.success_flag() {
                        self.job_store.mark_completed(job.key, now_ms).await
                    } else {
                        self.job_store.mark_failed(job.key, now_ms).await
                    };
                    if let Err(e) = result {
                        warn!(job = %job.key, error = %e, "failed to finalize completed job");
                    }
                }
            }
            "runner_crashed" => self.handle_runner_crashed(&vm, now_ms).await,
            other => {
                info!(%vm, event_type = other, "unrecognized event type (forward-compatible, ignored)");
            }
        }
    }
}

impl<K: KvStore, Ck: Clock> SchedulerEventHandler<K, Ck> {
    /// `runner_crashed` (spec §4.7): requeue if retries remain, else fail.
    async fn handle_runner_crashed(&self, vm: &VmId, now_ms: u64) {
        let Some(job) = self.job_store.get_by_vm(vm) else {
            return;
        };
        if job.status == fc_core::JobStatus::Running && job.can_retry() {
            if let Err(e) = self.job_store.requeue(job.key, now_ms).await {
                warn!(job = %job.key, error = %e, "failed to requeue job after runner crash");
            }
        } else {
            if let Err(e) = self.job_store.mark_failed(job.key, now_ms).await {
                warn!(job = %job.key, error = %e, "failed to mark job failed after runner crash");
            }
            warn!(job = %job.key, "runner crashed — max retries exceeded");
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
