// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VMStore: scalar per-VM status record plus the effective-state secondary
//! index (spec §4.2). The index is a cache over the pure
//! `fc_core::effective_state` function — per spec §9 "derived state as a
//! pure function", any caller that suspects the index is stale should
//! prefer the scalar record; [`VmStore::rebuild_index`] exists for exactly
//! that self-heal case.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fc_core::{
    effective_state, AgentHeartbeatState, EffectiveState, HealthMetrics, InfraState, JobKey,
    RunnerState, VmId, VmStatus,
};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::kv::KvStore;

struct Inner {
    records: HashMap<VmId, VmStatus>,
    state_index: HashMap<EffectiveState, HashSet<VmId>>,
    /// Last time (infra refresh or heartbeat) we heard anything about this
    /// VM — drives the 24h quiet-period expiry (spec §4.2), independent of
    /// `last_heartbeat_ms` which only tracks heartbeats specifically.
    last_seen_ms: HashMap<VmId, u64>,
}

impl Inner {
    fn reindex(&mut self, vm: &VmId) {
        for set in self.state_index.values_mut() {
            set.remove(vm);
        }
        if let Some(status) = self.records.get(vm) {
            self.state_index
                .entry(status.effective_state())
                .or_default()
                .insert(vm.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VmStoreStats {
    pub total: usize,
    pub ready: usize,
    pub idle: usize,
    pub busy: usize,
    pub stopped: usize,
    pub starting: usize,
    pub stopping: usize,
    pub error: usize,
}

fn record_key(pool_id: &str, vm: &VmId) -> String {
    format!("{pool_id}/vms/{}", vm.as_str())
}

pub struct VmStore<K: KvStore> {
    kv: Arc<K>,
    pool_id: String,
    inner: Mutex<Inner>,
}

impl<K: KvStore> VmStore<K> {
    pub async fn load(kv: Arc<K>, pool_id: impl Into<String>) -> Result<Self, StoreError> {
        let pool_id = pool_id.into();
        let prefix = format!("{pool_id}/vms/");
        let rows = kv.scan_prefix(&prefix).await?;

        let mut records = HashMap::new();
        let mut state_index: HashMap<EffectiveState, HashSet<VmId>> = HashMap::new();
        let mut last_seen_ms = HashMap::new();

        for (_, bytes) in rows {
            let status: VmStatus = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::StoreUnavailable(format!("corrupt vm record: {e}")))?;
            state_index
                .entry(status.effective_state())
                .or_default()
                .insert(status.vm.clone());
            last_seen_ms.insert(status.vm.clone(), status.last_heartbeat_ms.unwrap_or(0));
            records.insert(status.vm.clone(), status);
        }

        Ok(Self {
            kv,
            pool_id,
            inner: Mutex::new(Inner {
                records,
                state_index,
                last_seen_ms,
            }),
        })
    }

    async fn persist(&self, status: &VmStatus) -> Result<(), StoreError> {
        let key = record_key(&self.pool_id, &status.vm);
        let bytes = serde_json::to_vec(status)
            .map_err(|e| StoreError::StoreUnavailable(format!("encode failed: {e}")))?;
        self.kv.put(&key, bytes).await
    }

    /// `UpdateFromInfra(vm, zone, infraState)`: upsert, recompute effective
    /// state, rewrite the index (spec §4.2).
    pub async fn update_from_infra(
        &self,
        vm: VmId,
        zone: impl Into<String>,
        infra_state: InfraState,
        now_ms: u64,
    ) -> Result<VmStatus, StoreError> {
        let status = {
            let mut inner = self.inner.lock();
            let status = inner
                .records
                .entry(vm.clone())
                .or_insert_with(|| VmStatus::new_from_infra(vm.clone(), zone.into(), infra_state));
            status.infra_state = infra_state;
            let status = status.clone();
            inner.reindex(&vm);
            inner.last_seen_ms.insert(vm, now_ms);
            status
        };
        self.persist(&status).await?;
        Ok(status)
    }

    /// `UpdateFromHeartbeat(...)`: assumes infra `RUNNING`; creates the
    /// record if absent (spec §4.2).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_from_heartbeat(
        &self,
        vm: VmId,
        agent_state: AgentHeartbeatState,
        runner_state: RunnerState,
        health: HealthMetrics,
        current_job: Option<JobKey>,
        now_ms: u64,
    ) -> Result<VmStatus, StoreError> {
        let status = {
            let mut inner = self.inner.lock();
            let status = inner.records.entry(vm.clone()).or_insert_with(|| {
                VmStatus::new_from_infra(vm.clone(), String::new(), InfraState::Running)
            });
            status.agent_state = agent_state;
            status.runner_state = runner_state;
            status.health = health;
            status.current_job = current_job;
            status.last_heartbeat_ms = Some(now_ms);
            status.connected = true;
            let status = status.clone();
            inner.reindex(&vm);
            inner.last_seen_ms.insert(vm, now_ms);
            status
        };
        self.persist(&status).await?;
        Ok(status)
    }

    /// `SetConnected(vm, bool)`. On disconnect the agent state is forced to
    /// `Unknown` so the effective state cannot read `READY`/`IDLE` without
    /// live evidence (spec §4.2).
    pub async fn set_connected(&self, vm: &VmId, connected: bool) -> Result<Option<VmStatus>, StoreError> {
        let status = {
            let mut inner = self.inner.lock();
            let Some(status) = inner.records.get_mut(vm) else {
                return Ok(None);
            };
            status.connected = connected;
            if !connected {
                status.agent_state = AgentHeartbeatState::Unknown;
            }
            let status = status.clone();
            inner.reindex(vm);
            status
        };
        self.persist(&status).await?;
        Ok(Some(status))
    }

    /// `GetFirstReady()`: a VM in `READY`, else `IDLE`; `None` if neither
    /// exists. Tie-breaking among candidates is unspecified by the spec;
    /// this picks the lexicographically smallest VM id, which is stable
    /// against churn elsewhere in the index (spec §4.2).
    pub fn get_first_ready(&self) -> Option<VmStatus> {
        let inner = self.inner.lock();
        Self::first_in_state(&inner, EffectiveState::Ready)
            .or_else(|| Self::first_in_state(&inner, EffectiveState::Idle))
    }

    pub fn get_first_stopped(&self) -> Option<VmStatus> {
        let inner = self.inner.lock();
        Self::first_in_state(&inner, EffectiveState::Stopped)
    }

    fn first_in_state(inner: &Inner, state: EffectiveState) -> Option<VmStatus> {
        let ids = inner.state_index.get(&state)?;
        let id = ids.iter().min()?;
        inner.records.get(id).cloned()
    }

    pub fn get_by_effective_state(&self, state: EffectiveState) -> Vec<VmStatus> {
        let inner = self.inner.lock();
        let Some(ids) = inner.state_index.get(&state) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| inner.records.get(id).cloned()).collect()
    }

    pub fn count_by_state(&self) -> HashMap<EffectiveState, usize> {
        let inner = self.inner.lock();
        EffectiveState::ALL
            .into_iter()
            .map(|s| (s, inner.state_index.get(&s).map(|v| v.len()).unwrap_or(0)))
            .collect()
    }

    pub fn get_stats(&self) -> VmStoreStats {
        let counts = self.count_by_state();
        VmStoreStats {
            total: self.inner.lock().records.len(),
            ready: counts.get(&EffectiveState::Ready).copied().unwrap_or(0),
            idle: counts.get(&EffectiveState::Idle).copied().unwrap_or(0),
            busy: counts.get(&EffectiveState::Busy).copied().unwrap_or(0),
            stopped: counts.get(&EffectiveState::Stopped).copied().unwrap_or(0),
            starting: counts.get(&EffectiveState::Starting).copied().unwrap_or(0),
            stopping: counts.get(&EffectiveState::Stopping).copied().unwrap_or(0),
            error: counts.get(&EffectiveState::Error).copied().unwrap_or(0),
        }
    }

    pub fn get(&self, vm: &VmId) -> Option<VmStatus> {
        self.inner.lock().records.get(vm).cloned()
    }

    /// `Delete(vm)`: removes the record and every index entry for that VM
    /// (spec §4.2).
    pub async fn delete(&self, vm: &VmId) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock();
            inner.records.remove(vm);
            for set in inner.state_index.values_mut() {
                set.remove(vm);
            }
            inner.last_seen_ms.remove(vm);
        }
        self.kv.delete(&record_key(&self.pool_id, vm)).await
    }

    /// Rebuilds the state index from the scalar records from scratch
    /// (spec §9 self-heal sweep).
    pub fn rebuild_index(&self) {
        let mut inner = self.inner.lock();
        let mut fresh: HashMap<EffectiveState, HashSet<VmId>> = HashMap::new();
        for status in inner.records.values() {
            fresh
                .entry(status.effective_state())
                .or_default()
                .insert(status.vm.clone());
        }
        inner.state_index = fresh;
    }

    /// Drops records that have gone `quiet_ms` without either a heartbeat
    /// or an infra refresh (spec §4.2: "24h with no heartbeat and no infra
    /// refresh").
    pub async fn purge_stale(&self, now_ms: u64, quiet_ms: u64) -> Result<usize, StoreError> {
        let stale: Vec<VmId> = {
            let inner = self.inner.lock();
            inner
                .last_seen_ms
                .iter()
                .filter(|(_, seen)| now_ms.saturating_sub(**seen) > quiet_ms)
                .map(|(vm, _)| vm.clone())
                .collect()
        };
        for vm in &stale {
            if let Err(e) = self.delete(vm).await {
                warn!(vm = %vm, error = %e, "failed to purge stale vm record");
            }
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
#[path = "vm_store_tests.rs"]
mod tests;
