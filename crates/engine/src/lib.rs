// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fc-engine: the controller's process-local orchestration — CommandStream,
//! VMManager, Scheduler, and Ingress (spec §4.5–§4.8). Storage (JobStore,
//! VMStore) and the external-service adapters (TokenService, InfraAdapter,
//! BusClient) live one layer down in `fc-storage`/`fc-adapters`; this crate
//! wires them together into the controller's concurrent loops (spec §5).

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod ack_correlation;
pub mod command_stream;
pub mod error;
pub mod ingress;
pub mod offline_queue;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod vm_manager;

pub use ack_correlation::AckCorrelator;
pub use command_stream::{CommandStream, EventHandler, DEFAULT_OFFLINE_QUEUE_TTL_MS};
pub use error::SendCommandError;
pub use ingress::{Ingress, IngressOutcome};
pub use offline_queue::OfflineQueue;
pub use registry::{ConnectionSender, Registry};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEventHandler, TickOutcome};
pub use stats::{SchedulerStats, SchedulerStatsSnapshot};
pub use vm_manager::{VmManager, VmManagerConfig};
