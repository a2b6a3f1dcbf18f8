// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fc-storage: JobStore (spec §4.1) and VMStore (spec §4.2) layered on the
//! [`KvStore`] trait boundary standing in for the external key-value
//! medium (spec §1 Non-goals, §6 "Persisted state layout").

pub mod error;
pub mod job_store;
pub mod kv;
pub mod vm_store;

pub use error::StoreError;
pub use job_store::JobStore;
pub use kv::{InMemoryKv, KvStore};
pub use vm_store::{VmStore, VmStoreStats};
