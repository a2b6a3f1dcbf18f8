// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fleetd`: the pool-scoped controller process. Wires `fc-storage`'s
//! JobStore/VMStore, `fc-adapters`'s TokenService/InfraAdapter, and
//! `fc-engine`'s CommandStream/VMManager/Scheduler/Ingress behind an
//! `axum` HTTP/WebSocket edge (spec §4, §5, §6).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod http;
pub mod state;

pub use config::Config;
pub use state::AppState;
