// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration, assembled from environment variables with
//! defaults (spec §6 "Configuration" — the agent side of the same
//! env-first, file-then-default layering `fleetd` uses).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub vm_id: String,
    pub pool_id: String,
    pub org_id: String,
    pub controller_url: String,
    pub install_dir: std::path::PathBuf,
    pub worker_binary_url: String,
    pub worker_binary_sha256: String,
    pub heartbeat_interval: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

impl AgentConfig {
    /// Loads from environment variables; fails fast on missing required
    /// fields (spec §7 "Fatal startup: missing required config... Exit
    /// non-zero").
    pub fn from_env() -> Result<Self, String> {
        let vm_id = require_env("FLEET_AGENT_VM_ID")?;
        let pool_id = require_env("FLEET_AGENT_POOL_ID")?;
        let org_id = std::env::var("FLEET_AGENT_ORG_ID").unwrap_or_default();
        let controller_url = require_env("FLEET_AGENT_CONTROLLER_URL")?;
        let worker_binary_url = require_env("FLEET_AGENT_WORKER_URL")?;
        let worker_binary_sha256 = require_env("FLEET_AGENT_WORKER_SHA256")?;
        let install_dir = std::env::var("FLEET_AGENT_INSTALL_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("/opt/fleet-agent"));

        Ok(Self {
            vm_id,
            pool_id,
            org_id,
            controller_url,
            install_dir,
            worker_binary_url,
            worker_binary_sha256,
            heartbeat_interval: env_duration_ms("FLEET_AGENT_HEARTBEAT_MS", 15_000),
            reconnect_initial_backoff: env_duration_ms("FLEET_AGENT_RECONNECT_INITIAL_MS", 5_000),
            reconnect_max_backoff: env_duration_ms("FLEET_AGENT_RECONNECT_MAX_MS", 30_000),
        })
    }
}

fn require_env(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("missing required environment variable {key}"))
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_ms))
}
