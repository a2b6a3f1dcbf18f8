// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fleetd` configuration, loaded from the environment (spec §6 "Config
//! surface" — pool identity, the cloud/identity/bus endpoints, and the
//! timing knobs §4.6/§4.7 expose as tunables).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue(name, raw))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

fn u32_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Everything `fleetd` needs to boot one pool's scheduler/controller
/// (spec §6). A single process serves a single pool, matching the
/// scheduler's "one Scheduler per pool" decomposition (spec §5).
#[derive(Debug, Clone)]
pub struct Config {
    pub pool_id: String,
    pub org_id: String,
    pub bind_addr: String,

    /// Upper bound the managed instance group may scale to (spec §4.4
    /// `Resize` clamp).
    pub max_vms: u32,

    /// Identity-provider app id used to sign the JWT assertion (spec
    /// §4.3 step 1). The signing secret is opaque to `fleetd` beyond
    /// this — see [`TokenService`](fc_adapters::TokenService) — and is
    /// HS256 here rather than the production RS256 because the
    /// identity-provider client wired in by default is the in-memory
    /// fake (spec §1 Non-goals; no real provider to verify against).
    pub identity_app_id: String,
    pub identity_signing_secret: String,

    /// Self-hosted runner URL/group agents are told to register against
    /// (spec §4.3 step 3, §4.7 step 4b).
    pub runner_url: String,
    pub runner_group: String,

    pub scheduler_tick_interval: Duration,
    pub assignment_timeout: Duration,
    pub command_timeout: Duration,

    pub reconcile_interval: Duration,
    pub warm_pool_interval: Duration,
    pub idle_reap_interval: Duration,
    pub min_ready_vms: u32,
    pub max_scale_up_per_minute: u32,
    pub idle_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            pool_id: required("FLEETD_POOL_ID")?,
            org_id: required("FLEETD_ORG_ID")?,
            bind_addr: std::env::var("FLEETD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            max_vms: u32_var("FLEETD_MAX_VMS", 50)?,

            identity_app_id: required("FLEETD_IDENTITY_APP_ID")?,
            identity_signing_secret: required("FLEETD_IDENTITY_SIGNING_SECRET")?,

            runner_url: required("FLEETD_RUNNER_URL")?,
            runner_group: std::env::var("FLEETD_RUNNER_GROUP").unwrap_or_else(|_| "default".to_string()),

            scheduler_tick_interval: duration_ms("FLEETD_SCHEDULER_TICK_MS", 1_000)?,
            assignment_timeout: duration_ms("FLEETD_ASSIGNMENT_TIMEOUT_MS", 120_000)?,
            command_timeout: duration_ms("FLEETD_COMMAND_TIMEOUT_MS", 30_000)?,

            reconcile_interval: duration_ms("FLEETD_RECONCILE_INTERVAL_MS", 30_000)?,
            warm_pool_interval: duration_ms("FLEETD_WARM_POOL_INTERVAL_MS", 30_000)?,
            idle_reap_interval: duration_ms("FLEETD_IDLE_REAP_INTERVAL_MS", 30_000)?,
            min_ready_vms: u32_var("FLEETD_MIN_READY_VMS", 1)?,
            max_scale_up_per_minute: u32_var("FLEETD_MAX_SCALE_UP_PER_MINUTE", 5)?,
            idle_timeout_ms: duration_ms("FLEETD_IDLE_TIMEOUT_MS", 10 * 60 * 1000)?.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_falls_back_to_default_when_unset() {
        // Use a var name that is never set by the test environment.
        let d = duration_ms("FLEETD_TEST_NONEXISTENT_KNOB", 4242).unwrap();
        assert_eq!(d, Duration::from_millis(4242));
    }

    #[test]
    fn u32_var_rejects_non_numeric_value() {
        std::env::set_var("FLEETD_TEST_BAD_U32", "not-a-number");
        let result = u32_var("FLEETD_TEST_BAD_U32", 1);
        std::env::remove_var("FLEETD_TEST_BAD_U32");
        assert!(result.is_err());
    }
}
