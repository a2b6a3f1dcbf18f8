// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error taxonomy primitives (spec §7).
//!
//! Each crate still keeps its own boundary error type (`fc_storage::StoreError`,
//! `fc_adapters::TokenError`, ...); this module only holds the handful of
//! variants that recur across crate boundaries so callers can match on them
//! without round-tripping through string comparisons.

/// A job transition was attempted from a status that does not admit it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid transition for job {job}: {from} -> {attempted}")]
pub struct InvalidTransition {
    pub job: String,
    pub from: String,
    pub attempted: String,
}
