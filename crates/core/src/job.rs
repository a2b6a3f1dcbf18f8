// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identity and state machine (spec §3, §4.1).

use crate::error::InvalidTransition;
use crate::vm::VmId;
use serde::{Deserialize, Serialize};

/// Composite identity for a job: `(installation, job)`. This is the dedup
/// key Ingress uses and the key JobStore's record table is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub installation: i64,
    pub job: i64,
}

impl JobKey {
    pub fn new(installation: i64, job: i64) -> Self {
        Self { installation, job }
    }

    /// The dedup key used by Ingress (`"{installation}-{job}"`, spec §4.8).
    pub fn dedup_key(&self) -> String {
        format!("{}-{}", self.installation, self.job)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dedup_key())
    }
}

/// Status of a job (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    JobStatus {
        Queued => "queued",
        Assigned => "assigned",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A pending or in-flight CI job (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub owner: String,
    pub repo: String,
    pub labels: Vec<String>,
    pub pool_id: String,
    pub priority: i32,
    pub status: JobStatus,
    pub assigned_vm: Option<VmId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at_ms: u64,
    pub assigned_at_ms: Option<u64>,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
}

/// Default retry budget applied by `JobStore::Enqueue` when none is given.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Job {
    pub fn new(
        key: JobKey,
        owner: impl Into<String>,
        repo: impl Into<String>,
        labels: Vec<String>,
        pool_id: impl Into<String>,
        priority: i32,
        created_at_ms: u64,
    ) -> Self {
        Self {
            key,
            owner: owner.into(),
            repo: repo.into(),
            labels,
            pool_id: pool_id.into(),
            priority,
            status: JobStatus::Queued,
            assigned_vm: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at_ms,
            assigned_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// Invariant (spec §8.3): for jobs not in a terminal status,
    /// `AssignedVMID != None <=> Status in {Assigned, Running}`. Terminal
    /// jobs are exempt — their `assigned_vm` is left as a historical record.
    pub fn invariant_holds(&self) -> bool {
        if self.status.is_terminal() {
            return true;
        }
        let has_vm = self.assigned_vm.is_some();
        let assignable = matches!(self.status, JobStatus::Assigned | JobStatus::Running);
        has_vm == assignable
    }

    fn transition_err(&self, attempted: &str) -> InvalidTransition {
        InvalidTransition {
            job: self.key.to_string(),
            from: self.status.to_string(),
            attempted: attempted.to_string(),
        }
    }

    /// `QUEUED -> ASSIGNED`, §4.1 `AssignToVM`.
    pub fn assign_to_vm(&mut self, vm: VmId, now_ms: u64) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Queued {
            return Err(self.transition_err("assign_to_vm"));
        }
        self.status = JobStatus::Assigned;
        self.assigned_vm = Some(vm);
        self.assigned_at_ms = Some(now_ms);
        Ok(())
    }

    /// `ASSIGNED -> RUNNING`, driven by the `job_started` event (§4.7).
    pub fn mark_running(&mut self, now_ms: u64) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Assigned {
            return Err(self.transition_err("mark_running"));
        }
        self.status = JobStatus::Running;
        self.started_at_ms = Some(now_ms);
        Ok(())
    }

    /// `RUNNING -> COMPLETED` (also tolerates `ASSIGNED -> COMPLETED` for
    /// jobs that finish faster than their `job_started` event is observed).
    pub fn mark_completed(&mut self, now_ms: u64) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(self.transition_err("mark_completed"));
        }
        self.status = JobStatus::Completed;
        self.completed_at_ms = Some(now_ms);
        Ok(())
    }

    pub fn mark_failed(&mut self, now_ms: u64) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(self.transition_err("mark_failed"));
        }
        self.status = JobStatus::Failed;
        self.completed_at_ms = Some(now_ms);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now_ms: u64) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(self.transition_err("mark_cancelled"));
        }
        self.status = JobStatus::Cancelled;
        self.completed_at_ms = Some(now_ms);
        Ok(())
    }

    /// Whether this job still has retry budget left.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Clears assignment, bumps retry count, resets to `QUEUED`. Caller is
    /// responsible for re-inserting the record into the priority index with
    /// a fresh timestamp (spec §4.1 `Requeue`) and must call
    /// `mark_failed` instead when `can_retry()` is false.
    pub fn requeue(&mut self) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(self.transition_err("requeue"));
        }
        self.status = JobStatus::Queued;
        self.assigned_vm = None;
        self.assigned_at_ms = None;
        self.started_at_ms = None;
        self.retry_count += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
