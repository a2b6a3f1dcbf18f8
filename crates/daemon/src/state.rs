// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon state, handed to every `axum` handler via `State`
//! extraction. `fleetd` ships the in-memory [`fc_storage::InMemoryKv`] and
//! the `fc-adapters` test-support fakes as its default adapters — the
//! real cloud/identity/bus clients are an opaque external collaborator
//! (spec §1 Non-goals), the same boundary `InMemoryKv` itself already
//! draws for the KV medium.

use std::sync::Arc;

use fc_adapters::{FakeBusClient, FakeCloudComputeClient, FakeIdentityProviderClient, InfraAdapter, TokenService};
use fc_core::SystemClock;
use fc_engine::{CommandStream, SchedulerStats};
use fc_storage::{InMemoryKv, JobStore, VmStore};

use crate::config::Config;

pub type Kv = InMemoryKv;
pub type Clk = SystemClock;
pub type Cloud = FakeCloudComputeClient;
pub type Identity = FakeIdentityProviderClient;
pub type Bus = FakeBusClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub job_store: Arc<JobStore<Kv>>,
    pub vm_store: Arc<VmStore<Kv>>,
    pub infra: Arc<InfraAdapter<Cloud>>,
    pub tokens: Arc<TokenService<Identity, Clk>>,
    pub command_stream: Arc<CommandStream<Kv, Clk>>,
    pub stats: Arc<SchedulerStats>,
    pub clock: Clk,
}
