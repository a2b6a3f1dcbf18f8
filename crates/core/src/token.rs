// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived registration tokens minted by `TokenService` (spec §3, §4.3).
//!
//! These never touch durable storage — the only copies are the in-process
//! cache inside `TokenService` and the single command frame that carries
//! one to an agent. Logs must redact the token value, so `Debug` and
//! `Display` intentionally never print it.

use std::fmt;

/// Opaque, single-use credential with an absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationToken {
    token: String,
    pub expires_at_ms: u64,
}

impl RegistrationToken {
    pub fn new(token: impl Into<String>, expires_at_ms: u64) -> Self {
        Self { token: token.into(), expires_at_ms }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Exposes the secret value. Callers must not log the result.
    pub fn reveal(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Cached installation access token (spec §4.3 step 1).
#[derive(Clone, PartialEq, Eq)]
pub struct InstallationToken {
    token: String,
    pub expires_at_ms: u64,
}

impl InstallationToken {
    pub fn new(token: impl Into<String>, expires_at_ms: u64) -> Self {
        Self { token: token.into(), expires_at_ms }
    }

    /// Within 5 minutes of expiry counts as expired (spec §4.3 step 1).
    pub fn needs_refresh(&self, now_ms: u64) -> bool {
        const REFRESH_SKEW_MS: u64 = 5 * 60 * 1000;
        now_ms + REFRESH_SKEW_MS >= self.expires_at_ms
    }

    pub fn reveal(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}
