// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker subprocess supervision (spec §4.9 `RegisteringRunner`/`Idle`/
//! `JobRunning`): "run the worker's configure step non-interactively with
//! the token, start the worker subprocess" then "parse worker stdout for
//! job start/complete lines".

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::AgentError;

/// Events the worker supervisor surfaces from the subprocess's stdout
/// (spec §4.9: "emit `job_started` and `job_completed`... accordingly").
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    JobStarted { job_id: String },
    JobCompleted { job_id: String, success: bool },
    Exited { code: Option<i32> },
}

/// Runs the worker's non-interactive configure step and supervises the
/// long-lived subprocess. A trait so [`AgentCore`](crate::core::AgentCore)
/// can be driven by a fake in tests without spawning a real process.
#[async_trait]
pub trait WorkerSupervisor: Send + Sync {
    /// `RegisteringRunner` (spec §4.9): configures the worker with the
    /// single-use token, non-interactively.
    async fn configure(&self, worker_path: &Path, token: &str, url: &str, runner_group: &str, name: &str, labels: &[String]) -> Result<(), AgentError>;

    /// Starts the long-lived worker process and returns a channel of
    /// parsed lifecycle events. The channel closes when the process exits.
    async fn start(&self, worker_path: &Path) -> Result<mpsc::UnboundedReceiver<WorkerEvent>, AgentError>;

    /// `Draining`/`ShuttingDown` (spec §4.9): ask the worker to finish its
    /// current job (drain) or terminate immediately (shutdown).
    async fn drain(&self) -> Result<(), AgentError>;
    async fn shutdown(&self) -> Result<(), AgentError>;
}

/// Spawns the real worker subprocess via `tokio::process::Command`. The
/// worker's own line protocol on stdout is `JOB_STARTED <id>` /
/// `JOB_COMPLETED <id> <success|failure>` — the third-party runner binary
/// is the external collaborator (spec §1 Non-goals "the agent's interior"
/// is out of scope beyond this contract).
pub struct ProcessWorkerSupervisor {
    child: parking_lot::Mutex<Option<Child>>,
}

impl Default for ProcessWorkerSupervisor {
    fn default() -> Self {
        Self { child: parking_lot::Mutex::new(None) }
    }
}

impl ProcessWorkerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(line: &str) -> Option<WorkerEvent> {
        let mut parts = line.split_whitespace();
        match parts.next()? {
            "JOB_STARTED" => Some(WorkerEvent::JobStarted { job_id: parts.next()?.to_string() }),
            "JOB_COMPLETED" => {
                let job_id = parts.next()?.to_string();
                let success = matches!(parts.next()?, "success");
                Some(WorkerEvent::JobCompleted { job_id, success })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl WorkerSupervisor for ProcessWorkerSupervisor {
    async fn configure(
        &self,
        worker_path: &Path,
        token: &str,
        url: &str,
        runner_group: &str,
        name: &str,
        labels: &[String],
    ) -> Result<(), AgentError> {
        let status = Command::new(worker_path)
            .arg("configure")
            .arg("--unattended")
            .arg("--ephemeral")
            .arg("--url")
            .arg(url)
            .arg("--token")
            .arg(token)
            .arg("--runnergroup")
            .arg(runner_group)
            .arg("--name")
            .arg(name)
            .arg("--labels")
            .arg(labels.join(","))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| AgentError::Worker(format!("configure spawn failed: {e}")))?;

        if !status.success() {
            return Err(AgentError::Worker(format!("configure exited with {status}")));
        }
        Ok(())
    }

    async fn start(&self, worker_path: &Path) -> Result<mpsc::UnboundedReceiver<WorkerEvent>, AgentError> {
        let mut child = Command::new(worker_path)
            .arg("run")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Worker(format!("worker spawn failed: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| AgentError::Worker("no stdout handle".into()))?;
        *self.child.lock() = Some(child);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = ProcessWorkerSupervisor::parse_line(&line) {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(WorkerEvent::Exited { code: None });
                        break;
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn drain(&self) -> Result<(), AgentError> {
        // No new jobs are accepted while draining; the in-flight job (if
        // any) finishes on its own and the existing stdout stream reports
        // its completion normally. Nothing to signal to the subprocess.
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        if let Some(mut child) = self.child.lock().take() {
            child.start_kill().map_err(|e| AgentError::Worker(format!("failed to signal worker: {e}")))?;
            let _ = child.wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_started_line() {
        let ev = ProcessWorkerSupervisor::parse_line("JOB_STARTED abc123").unwrap();
        assert_eq!(ev, WorkerEvent::JobStarted { job_id: "abc123".to_string() });
    }

    #[test]
    fn parses_job_completed_success_and_failure() {
        let ok = ProcessWorkerSupervisor::parse_line("JOB_COMPLETED abc123 success").unwrap();
        assert_eq!(ok, WorkerEvent::JobCompleted { job_id: "abc123".to_string(), success: true });

        let failed = ProcessWorkerSupervisor::parse_line("JOB_COMPLETED abc123 failure").unwrap();
        assert_eq!(failed, WorkerEvent::JobCompleted { job_id: "abc123".to_string(), success: false });
    }

    #[test]
    fn ignores_unrecognized_lines() {
        assert_eq!(ProcessWorkerSupervisor::parse_line("Listening for jobs..."), None);
        assert_eq!(ProcessWorkerSupervisor::parse_line(""), None);
    }
}
