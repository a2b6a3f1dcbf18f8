// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VMManager: warm-pool maintenance, idle reaping, and reconciliation with
//! cloud truth (spec §4.6). The three duties are independent and safe to
//! run concurrently — each reads the VMStore's current snapshot and a race
//! between two of them converges on the next reconcile pass.

use std::sync::Arc;
use std::time::Duration;

use fc_adapters::{CloudComputeClient, InfraAdapter};
use fc_core::{Clock, EffectiveState, VmId};
use fc_storage::{KvStore, VmStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct VmManagerConfig {
    pub reconcile_interval: Duration,
    pub warm_pool_interval: Duration,
    pub idle_reap_interval: Duration,
    pub min_ready_vms: u32,
    pub max_scale_up_per_minute: u32,
    pub idle_timeout_ms: u64,
}

impl Default for VmManagerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            warm_pool_interval: Duration::from_secs(30),
            idle_reap_interval: Duration::from_secs(30),
            min_ready_vms: 1,
            max_scale_up_per_minute: 5,
            idle_timeout_ms: 10 * 60 * 1000,
        }
    }
}

pub struct VmManager<Cc: CloudComputeClient, K: KvStore, Ck: Clock> {
    infra: Arc<InfraAdapter<Cc>>,
    vm_store: Arc<VmStore<K>>,
    clock: Ck,
    config: VmManagerConfig,
}

impl<Cc: CloudComputeClient, K: KvStore, Ck: Clock> VmManager<Cc, K, Ck> {
    pub fn new(infra: Arc<InfraAdapter<Cc>>, vm_store: Arc<VmStore<K>>, clock: Ck, config: VmManagerConfig) -> Self {
        Self { infra, vm_store, clock, config }
    }

    /// Spawns the three tickers and runs until `cancel` fires (spec §5
    /// "one VM-manager loop with three independent tickers").
    pub async fn run(self: Arc<Self>, cancel: CancellationToken)
    where
        Cc: 'static,
        K: 'static,
        Ck: 'static,
    {
        let reconcile = self.clone();
        let reconcile_cancel = cancel.clone();
        let reconcile_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconcile.config.reconcile_interval);
            loop {
                tokio::select! {
                    _ = reconcile_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = reconcile.reconcile_tick().await {
                            warn!(error = %e, "reconcile tick failed");
                        }
                    }
                }
            }
        });

        let warm_pool = self.clone();
        let warm_pool_cancel = cancel.clone();
        let warm_pool_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(warm_pool.config.warm_pool_interval);
            loop {
                tokio::select! {
                    _ = warm_pool_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = warm_pool.warm_pool_tick().await {
                            warn!(error = %e, "warm pool tick failed");
                        }
                    }
                }
            }
        });

        let idle_reap = self.clone();
        let idle_reap_cancel = cancel.clone();
        let idle_reap_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle_reap.config.idle_reap_interval);
            loop {
                tokio::select! {
                    _ = idle_reap_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = idle_reap.idle_reap_tick().await {
                            warn!(error = %e, "idle reap tick failed");
                        }
                    }
                }
            }
        });

        let _ = tokio::join!(reconcile_task, warm_pool_task, idle_reap_task);
    }

    /// §4.6.1 Reconcile: `ListManagedInstances` -> `UpdateFromInfra` for
    /// each. VMs present in the store but absent from the cloud list are
    /// left to their TTL, not actively deleted here.
    pub async fn reconcile_tick(&self) -> Result<(), fc_adapters::InfraError> {
        let instances = self.infra.list_managed_instances().await?;
        let now_ms = self.clock.epoch_ms();
        for instance in instances {
            if let Err(e) = self
                .vm_store
                .update_from_infra(VmId::new(instance.name.clone()), instance.zone, instance.infra_state, now_ms)
                .await
            {
                warn!(vm = %instance.name, error = %e, "failed to apply reconciled infra state");
            }
        }
        Ok(())
    }

    /// §4.6.2 Warm pool: start stopped VMs first, then resize for any
    /// remaining deficit, rate-limited by `max_scale_up_per_minute`.
    pub async fn warm_pool_tick(&self) -> Result<(), fc_adapters::InfraError> {
        let ready = self.vm_store.get_by_effective_state(EffectiveState::Ready).len();
        let idle = self.vm_store.get_by_effective_state(EffectiveState::Idle).len();
        let warm = (ready + idle) as u32;
        let mut deficit = self.config.min_ready_vms.saturating_sub(warm);
        if deficit == 0 {
            return Ok(());
        }

        while deficit > 0 {
            let Some(stopped) = self.vm_store.get_first_stopped() else { break };
            self.infra.start_vm(stopped.vm.as_str()).await?;
            let now_ms = self.clock.epoch_ms();
            self.vm_store
                .update_from_infra(stopped.vm.clone(), stopped.zone.clone(), fc_core::InfraState::Staging, now_ms)
                .await
                .ok();
            info!(vm = %stopped.vm, "started stopped vm to cover warm-pool deficit");
            deficit -= 1;
        }

        if deficit > 0 {
            let k = deficit.min(self.config.max_scale_up_per_minute);
            let new_size = self.infra.resize(k as i64).await?;
            info!(requested = k, new_target_size = new_size, "resized managed group for warm-pool deficit");
        }
        Ok(())
    }

    /// §4.6.3 Idle reap: only while above the warm-pool minimum, stop (not
    /// delete) idle VMs whose last heartbeat has gone stale.
    pub async fn idle_reap_tick(&self) -> Result<(), fc_adapters::InfraError> {
        let ready = self.vm_store.get_by_effective_state(EffectiveState::Ready).len();
        let idle_vms = self.vm_store.get_by_effective_state(EffectiveState::Idle);
        if ready + idle_vms.len() <= self.config.min_ready_vms as usize {
            return Ok(());
        }

        let now_ms = self.clock.epoch_ms();
        let mut headroom = (ready + idle_vms.len()) - self.config.min_ready_vms as usize;
        for vm in idle_vms {
            if headroom == 0 {
                break;
            }
            let stale = vm
                .last_heartbeat_ms
                .map(|t| now_ms.saturating_sub(t) > self.config.idle_timeout_ms)
                .unwrap_or(true);
            if !stale {
                continue;
            }
            self.infra.stop_vm(vm.vm.as_str()).await?;
            self.vm_store
                .update_from_infra(vm.vm.clone(), vm.zone.clone(), fc_core::InfraState::Stopping, now_ms)
                .await
                .ok();
            info!(vm = %vm.vm, "stopped idle vm past idle timeout");
            headroom -= 1;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "vm_manager_tests.rs"]
mod tests;
