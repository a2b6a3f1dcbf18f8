// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker binary installation (spec §4.9 `Initializing`): "download,
//! SHA-256 verify, extract to a scratch directory, removing any previous
//! installation."

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AgentError;

/// Installs the worker binary. A trait so [`AgentCore`](crate::core::AgentCore)
/// is testable without a real network download or filesystem extraction.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, url: &str, expected_sha256: &str) -> Result<std::path::PathBuf, AgentError>;
}

/// Downloads over HTTP via `reqwest`, verifies the SHA-256 digest, and
/// extracts into a fresh scratch directory under `install_dir`, removing
/// any previous installation first (spec §4.9).
pub struct HttpInstaller {
    client: reqwest::Client,
    install_dir: std::path::PathBuf,
}

impl HttpInstaller {
    pub fn new(install_dir: std::path::PathBuf) -> Self {
        Self { client: reqwest::Client::new(), install_dir }
    }
}

#[async_trait]
impl Installer for HttpInstaller {
    async fn install(&self, url: &str, expected_sha256: &str) -> Result<std::path::PathBuf, AgentError> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Install(format!("download failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| AgentError::Install(format!("download body read failed: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex_encode(&hasher.finalize());
        if !digest.eq_ignore_ascii_case(expected_sha256) {
            return Err(AgentError::Install(format!(
                "checksum mismatch: expected {expected_sha256}, got {digest}"
            )));
        }

        if self.install_dir.exists() {
            std::fs::remove_dir_all(&self.install_dir)
                .map_err(|e| AgentError::Install(format!("failed to clear previous installation: {e}")))?;
        }
        std::fs::create_dir_all(&self.install_dir)
            .map_err(|e| AgentError::Install(format!("failed to create install dir: {e}")))?;

        let worker_path = self.install_dir.join("worker");
        std::fs::write(&worker_path, &bytes)
            .map_err(|e| AgentError::Install(format!("failed to write worker binary: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&worker_path)
                .map_err(|e| AgentError::Install(e.to_string()))?
                .permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&worker_path, perms).map_err(|e| AgentError::Install(e.to_string()))?;
        }

        Ok(worker_path)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
