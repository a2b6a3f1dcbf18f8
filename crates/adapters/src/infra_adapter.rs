// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! InfraAdapter: thin, non-retrying wrapper over the cloud compute API
//! (spec §4.4). The cloud-provider SDK itself is an opaque external
//! collaborator (spec §1 Non-goals); [`CloudComputeClient`] is the trait
//! boundary a real implementation plugs into.

use async_trait::async_trait;
use fc_core::InfraState;
use tracing::warn;

use crate::error::InfraError;

/// One entry from `ListManagedInstances` (spec §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub name: String,
    pub zone: String,
    pub infra_state: InfraState,
}

/// Opaque cloud compute API boundary (spec §1 Non-goals). Each method is a
/// single best-effort invocation; `InfraAdapter` itself never retries.
#[async_trait]
pub trait CloudComputeClient: Send + Sync {
    async fn start_instance(&self, name: &str) -> Result<(), InfraError>;
    async fn stop_instance(&self, name: &str) -> Result<(), InfraError>;
    async fn delete_instance(&self, name: &str) -> Result<(), InfraError>;
    async fn group_target_size(&self) -> Result<u32, InfraError>;
    async fn resize_group(&self, new_target_size: u32) -> Result<(), InfraError>;
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>, InfraError>;
}

pub struct InfraAdapter<C: CloudComputeClient> {
    client: C,
    max_vms: u32,
}

impl<C: CloudComputeClient> InfraAdapter<C> {
    pub fn new(client: C, max_vms: u32) -> Self {
        Self { client, max_vms }
    }

    /// `StartVM(name)`: blocks until the provider-side long-running
    /// operation completes. Returns the new infra state (`Staging`) on
    /// success for the caller to write into VMStore (spec §4.4).
    pub async fn start_vm(&self, name: &str) -> Result<InfraState, InfraError> {
        self.client.start_instance(name).await?;
        Ok(InfraState::Staging)
    }

    /// `StopVM(name)`: returns `Stopping` on success (spec §4.4).
    pub async fn stop_vm(&self, name: &str) -> Result<InfraState, InfraError> {
        self.client.stop_instance(name).await?;
        Ok(InfraState::Stopping)
    }

    /// `Resize(delta)`: reads the current target size, adds `delta`,
    /// clamps to `[0, max_vms]`, issues the resize. Does not wait for new
    /// instances to appear — those show up on the next reconcile pass
    /// (spec §4.4, §4.6).
    pub async fn resize(&self, delta: i64) -> Result<u32, InfraError> {
        let current = self.client.group_target_size().await?;
        let requested = (current as i64 + delta).max(0) as u32;
        if requested > self.max_vms {
            return Err(InfraError::ExceedsMaxVms { requested, max: self.max_vms });
        }
        self.client.resize_group(requested).await?;
        Ok(requested)
    }

    /// `DeleteInstances(names)`: per-name best-effort; a failure is logged
    /// but does not abort the remaining names (spec §4.4).
    pub async fn delete_instances(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self.client.delete_instance(name).await {
                warn!(vm = %name, error = %e, "failed to delete instance");
            }
        }
    }

    pub async fn list_managed_instances(&self) -> Result<Vec<InstanceInfo>, InfraError> {
        self.client.list_instances().await
    }

    pub fn max_vms(&self) -> u32 {
        self.max_vms
    }
}

#[cfg(test)]
#[path = "infra_adapter_tests.rs"]
mod tests;
