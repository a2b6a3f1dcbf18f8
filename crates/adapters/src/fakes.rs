// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fakes for [`CloudComputeClient`] and [`IdentityProviderClient`],
//! gated behind the `test-support` feature so other crates' integration
//! tests (and the root workspace `tests/specs.rs`) can drive a full
//! Scheduler/VMManager stack without a real cloud or identity provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fc_core::{InfraState, InstallationToken, RegistrationToken};
use parking_lot::Mutex;

use crate::error::{InfraError, TokenError};
use crate::infra_adapter::{CloudComputeClient, InstanceInfo};
use crate::token_service::IdentityProviderClient;

/// An in-memory cloud compute backend. Starts/stops are recorded and
/// reflected in `list_instances` so a `VmManager`/`Scheduler` exercised
/// against this fake sees its own actions echoed back on the next
/// reconcile, the way a real managed instance group eventually would.
#[derive(Default)]
pub struct FakeCloudComputeClient {
    target_size: Mutex<u32>,
    instances: Mutex<HashMap<String, InstanceInfo>>,
    fail_next_start: Mutex<bool>,
}

impl FakeCloudComputeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_instance(&self, name: impl Into<String>, zone: impl Into<String>, state: InfraState) {
        let name = name.into();
        self.instances
            .lock()
            .insert(name.clone(), InstanceInfo { name, zone: zone.into(), infra_state: state });
    }

    pub fn fail_next_start(&self) {
        *self.fail_next_start.lock() = true;
    }

    pub fn target_size(&self) -> u32 {
        *self.target_size.lock()
    }
}

#[async_trait]
impl CloudComputeClient for FakeCloudComputeClient {
    async fn start_instance(&self, name: &str) -> Result<(), InfraError> {
        if std::mem::take(&mut *self.fail_next_start.lock()) {
            return Err(InfraError::Provider { operation: "start".into(), message: "quota exceeded".into() });
        }
        if let Some(info) = self.instances.lock().get_mut(name) {
            info.infra_state = InfraState::Staging;
        }
        Ok(())
    }

    async fn stop_instance(&self, name: &str) -> Result<(), InfraError> {
        if let Some(info) = self.instances.lock().get_mut(name) {
            info.infra_state = InfraState::Stopping;
        }
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<(), InfraError> {
        self.instances.lock().remove(name);
        Ok(())
    }

    async fn group_target_size(&self) -> Result<u32, InfraError> {
        Ok(*self.target_size.lock())
    }

    async fn resize_group(&self, new_target_size: u32) -> Result<(), InfraError> {
        *self.target_size.lock() = new_target_size;
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceInfo>, InfraError> {
        Ok(self.instances.lock().values().cloned().collect())
    }
}

/// An in-memory identity-provider stand-in that mints deterministic
/// string tokens, so tests can assert on which owner/repo a registration
/// token was scoped to without decoding a real JWT.
#[derive(Default)]
pub struct FakeIdentityProviderClient {
    pub exchange_calls: AtomicUsize,
    pub mint_calls: AtomicUsize,
}

impl FakeIdentityProviderClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProviderClient for FakeIdentityProviderClient {
    async fn exchange_installation_token(
        &self,
        installation_id: i64,
        _assertion: &str,
    ) -> Result<InstallationToken, TokenError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok(InstallationToken::new(format!("install-tok-{installation_id}"), u64::MAX / 2))
    }

    async fn mint_registration_token(
        &self,
        installation_token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RegistrationToken, TokenError> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RegistrationToken::new(format!("reg-tok-{owner}-{repo}-{installation_token}"), u64::MAX / 2))
    }
}

/// An in-memory bus, used by integration tests that exercise `Ingress`
/// end-to-end instead of calling `Ingress::process` directly.
#[derive(Default)]
pub struct FakeBusClient {
    queue: Mutex<std::collections::VecDeque<crate::bus_client::BusMessage>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
}

impl FakeBusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, ack_id: impl Into<String>, payload: Vec<u8>) {
        self.queue.lock().push_back(crate::bus_client::BusMessage { ack_id: ack_id.into(), payload });
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }
}

#[async_trait]
impl crate::bus_client::BusClient for FakeBusClient {
    async fn receive(&self) -> Result<Option<crate::bus_client::BusMessage>, crate::error::BusError> {
        Ok(self.queue.lock().pop_front())
    }

    async fn ack(&self, message: &crate::bus_client::BusMessage) -> Result<(), crate::error::BusError> {
        self.acked.lock().push(message.ack_id.clone());
        Ok(())
    }

    async fn nack(&self, message: &crate::bus_client::BusMessage) -> Result<(), crate::error::BusError> {
        self.nacked.lock().push(message.ack_id.clone());
        Ok(())
    }
}
