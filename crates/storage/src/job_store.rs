// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JobStore: durable priority queue of pending jobs plus the per-job
//! record table keyed by `(installation, job)` (spec §4.1).
//!
//! The priority index itself — `score -> job key` — is an in-process
//! structure rebuilt from the persisted records on construction; the `KV`
//! only durably stores the job records themselves (spec §6 "Persisted
//! state layout": "priority index, per-job record, VM->job reverse
//! lookup" all live in the job-queue namespace, but only the record
//! table needs the KV's durability — the index is a derived cache, same
//! as VMStore's state index in §4.2/§9).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fc_core::{Job, JobKey, JobStatus, VmId, DEFAULT_MAX_RETRIES};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::kv::KvStore;

/// `(priority, created_at_ms, sequence)`. Smaller priority dominates
/// (spec: "priority, smaller is higher-priority"); ties broken by
/// `created_at_ms` then by a monotonic `sequence` counter, which gives a
/// strict enqueue-order tiebreak even when two jobs share a millisecond
/// (spec §4.1 ordering contract, §8 property 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    priority: i32,
    created_at_ms: u64,
    sequence: u64,
}

struct Inner {
    records: HashMap<JobKey, Job>,
    /// score -> job key. A job appears here iff its status is `Queued`.
    priority_index: BTreeMap<Score, JobKey>,
    /// job key -> its current score, so `Requeue`/removal can find and
    /// erase the old index entry without a linear scan.
    scores: HashMap<JobKey, Score>,
    vm_reverse_index: HashMap<VmId, JobKey>,
}

impl Inner {
    fn insert_into_priority_index(&mut self, key: JobKey, score: Score) {
        self.priority_index.insert(score, key);
        self.scores.insert(key, score);
    }

    fn remove_from_priority_index(&mut self, key: &JobKey) {
        if let Some(score) = self.scores.remove(key) {
            self.priority_index.remove(&score);
        }
    }
}

/// JobStore for a single pool. `pool_id` namespaces keys so multiple
/// controllers sharing a KV medium never collide (spec §6).
pub struct JobStore<K: KvStore> {
    kv: Arc<K>,
    pool_id: String,
    sequence: AtomicU64,
    inner: Mutex<Inner>,
}

fn record_key(pool_id: &str, key: &JobKey) -> String {
    format!("{pool_id}/jobs/{}", key.dedup_key())
}

impl<K: KvStore> JobStore<K> {
    /// Loads all persisted records for `pool_id` and rebuilds the
    /// in-process priority index and reverse index from them.
    pub async fn load(kv: Arc<K>, pool_id: impl Into<String>) -> Result<Self, StoreError> {
        let pool_id = pool_id.into();
        let prefix = format!("{pool_id}/jobs/");
        let rows = kv.scan_prefix(&prefix).await?;

        let mut records = HashMap::new();
        let mut priority_index = BTreeMap::new();
        let mut scores = HashMap::new();
        let mut vm_reverse_index = HashMap::new();
        let mut max_sequence = 0u64;

        for (_, bytes) in rows {
            let job: Job = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::StoreUnavailable(format!("corrupt job record: {e}")))?;
            let sequence = max_sequence;
            max_sequence += 1;
            if job.status == JobStatus::Queued {
                let score = Score {
                    priority: job.priority,
                    created_at_ms: job.created_at_ms,
                    sequence,
                };
                priority_index.insert(score, job.key);
                scores.insert(job.key, score);
            }
            if let Some(vm) = job.assigned_vm.clone() {
                if matches!(job.status, JobStatus::Assigned | JobStatus::Running) {
                    vm_reverse_index.insert(vm, job.key);
                }
            }
            records.insert(job.key, job);
        }

        Ok(Self {
            kv,
            pool_id,
            sequence: AtomicU64::new(max_sequence),
            inner: Mutex::new(Inner {
                records,
                priority_index,
                scores,
                vm_reverse_index,
            }),
        })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    async fn persist(&self, job: &Job) -> Result<(), StoreError> {
        let key = record_key(&self.pool_id, &job.key);
        let bytes = serde_json::to_vec(job)
            .map_err(|e| StoreError::StoreUnavailable(format!("encode failed: {e}")))?;
        self.kv.put(&key, bytes).await
    }

    /// `Enqueue(job)` (spec §4.1). Idempotent on `(installation, job)`
    /// (spec §8 property 4): re-enqueuing an existing non-terminal job is a
    /// no-op that returns the existing record rather than inserting a
    /// duplicate queue entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        key: JobKey,
        owner: String,
        repo: String,
        labels: Vec<String>,
        pool_id: String,
        priority: i32,
        created_at_ms: u64,
    ) -> Result<Job, StoreError> {
        {
            let inner = self.inner.lock();
            if let Some(existing) = inner.records.get(&key) {
                return Ok(existing.clone());
            }
        }

        let mut job = Job::new(key, owner, repo, labels, pool_id, priority, created_at_ms);
        job.max_retries = DEFAULT_MAX_RETRIES;

        let sequence = self.next_sequence();
        {
            let mut inner = self.inner.lock();
            // Re-check under lock: another writer may have enqueued the
            // same key between our read above and this insert.
            if let Some(existing) = inner.records.get(&key) {
                return Ok(existing.clone());
            }
            let score = Score {
                priority: job.priority,
                created_at_ms: job.created_at_ms,
                sequence,
            };
            inner.insert_into_priority_index(key, score);
            inner.records.insert(key, job.clone());
        }

        self.persist(&job).await?;
        Ok(job)
    }

    /// `Peek()`: the lowest-scored queued job, without removing it (spec
    /// §4.1 — so a transient provisioning failure never loses the job).
    pub fn peek(&self) -> Option<Job> {
        let inner = self.inner.lock();
        let key = inner.priority_index.values().next()?;
        inner.records.get(key).cloned()
    }

    /// `Dequeue()`: atomically pops the lowest-scored job.
    pub fn dequeue(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        let (score, key) = inner.priority_index.iter().next().map(|(s, k)| (*s, *k))?;
        inner.priority_index.remove(&score);
        inner.scores.remove(&key);
        inner.records.get(&key).cloned()
    }

    pub fn get(&self, key: JobKey) -> Result<Job, StoreError> {
        self.inner
            .lock()
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn get_by_vm(&self, vm: &VmId) -> Option<Job> {
        let inner = self.inner.lock();
        let key = inner.vm_reverse_index.get(vm)?;
        inner.records.get(key).cloned()
    }

    pub fn queue_length(&self) -> usize {
        self.inner.lock().priority_index.len()
    }

    /// `AssignToVM(job, vm)`: `QUEUED -> ASSIGNED`, sets `AssignedVMID`,
    /// updates the vm->job reverse index (spec §4.1).
    pub async fn assign_to_vm(&self, key: JobKey, vm: VmId, now_ms: u64) -> Result<Job, StoreError> {
        let job = {
            let mut inner = self.inner.lock();
            let job = inner
                .records
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            job.assign_to_vm(vm.clone(), now_ms)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            let job = job.clone();
            inner.remove_from_priority_index(&key);
            inner.vm_reverse_index.insert(vm, key);
            job
        };
        self.persist(&job).await?;
        Ok(job)
    }

    pub async fn mark_running(&self, key: JobKey, now_ms: u64) -> Result<Job, StoreError> {
        self.transition(key, |job| job.mark_running(now_ms)).await
    }

    /// `MarkCompleted`/`MarkFailed` clear the vm reverse index entry for
    /// this job (spec §4.1 "VM-reverse-index cleanup").
    pub async fn mark_completed(&self, key: JobKey, now_ms: u64) -> Result<Job, StoreError> {
        let job = self.transition(key, |job| job.mark_completed(now_ms)).await?;
        self.clear_vm_reverse_index(&job);
        Ok(job)
    }

    pub async fn mark_failed(&self, key: JobKey, now_ms: u64) -> Result<Job, StoreError> {
        let job = self.transition(key, |job| job.mark_failed(now_ms)).await?;
        self.clear_vm_reverse_index(&job);
        Ok(job)
    }

    pub async fn mark_cancelled(&self, key: JobKey, now_ms: u64) -> Result<Job, StoreError> {
        let job = self.transition(key, |job| job.mark_cancelled(now_ms)).await?;
        self.clear_vm_reverse_index(&job);
        Ok(job)
    }

    /// `Requeue`: clears assignment, bumps retry count, re-inserts into the
    /// priority index with a fresh timestamp (spec §4.1). Callers must
    /// check `Job::can_retry` first and call `mark_failed` instead when
    /// retries are exhausted — this method performs the mechanical requeue
    /// unconditionally, matching `fc_core::Job::requeue`.
    pub async fn requeue(&self, key: JobKey, now_ms: u64) -> Result<Job, StoreError> {
        let sequence = self.next_sequence();
        let job = {
            let mut inner = self.inner.lock();
            let job = inner
                .records
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            job.requeue()
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            job.created_at_ms = now_ms;
            let job = job.clone();
            inner.remove_from_priority_index(&key);
            inner.vm_reverse_index.retain(|_, v| *v != key);
            let score = Score {
                priority: job.priority,
                created_at_ms: now_ms,
                sequence,
            };
            inner.insert_into_priority_index(key, score);
            job
        };
        self.persist(&job).await?;
        Ok(job)
    }

    async fn transition(
        &self,
        key: JobKey,
        f: impl FnOnce(&mut Job) -> Result<(), fc_core::InvalidTransition>,
    ) -> Result<Job, StoreError> {
        let job = {
            let mut inner = self.inner.lock();
            let job = inner
                .records
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            f(job).map_err(|e| StoreError::Conflict(e.to_string()))?;
            job.clone()
        };
        self.persist(&job).await?;
        Ok(job)
    }

    fn clear_vm_reverse_index(&self, job: &Job) {
        let mut inner = self.inner.lock();
        if let Some(vm) = &job.assigned_vm {
            if inner.vm_reverse_index.get(vm) == Some(&job.key) {
                inner.vm_reverse_index.remove(vm);
            }
        }
    }

    /// Drops terminal job records older than `horizon_ms` past their
    /// completion time (spec §3 "retained for a bounded horizon... to
    /// absorb late duplicates").
    pub async fn purge_expired(&self, now_ms: u64, horizon_ms: u64) -> Result<usize, StoreError> {
        let expired: Vec<JobKey> = {
            let inner = self.inner.lock();
            inner
                .records
                .values()
                .filter(|job| {
                    job.status.is_terminal()
                        && job
                            .completed_at_ms
                            .is_some_and(|t| now_ms.saturating_sub(t) > horizon_ms)
                })
                .map(|job| job.key)
                .collect()
        };
        for key in &expired {
            self.inner.lock().records.remove(key);
            let k = record_key(&self.pool_id, key);
            if let Err(e) = self.kv.delete(&k).await {
                warn!(job = %key, error = %e, "failed to purge expired job record");
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
#[path = "job_store_tests.rs"]
mod tests;
