// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters for the external collaborators named as Non-goals in spec §1:
//! the identity provider, the cloud compute API, and the message bus.
//! Each boundary is a trait plus a thin struct wrapping it; none of them
//! retry internally — retry policy lives with the caller (spec §7).

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bus_client;
pub mod error;
#[cfg(feature = "test-support")]
pub mod fakes;
pub mod infra_adapter;
pub mod token_service;

pub use bus_client::{BusClient, BusMessage};
pub use error::{BusError, InfraError, TokenError};
#[cfg(feature = "test-support")]
pub use fakes::{FakeBusClient, FakeCloudComputeClient, FakeIdentityProviderClient};
pub use infra_adapter::{CloudComputeClient, InfraAdapter, InstanceInfo};
pub use token_service::{IdentityProviderClient, TokenService};
