// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn job() -> Job {
    Job::new(
        JobKey::new(1, 100),
        "o",
        "o/r",
        vec!["self-hosted".into(), "linux".into()],
        "pool-a",
        5,
        1_000,
    )
}

#[test]
fn dedup_key_matches_ingress_format() {
    let key = JobKey::new(1, 100);
    assert_eq!(key.dedup_key(), "1-100");
    assert_eq!(key.to_string(), "1-100");
}

#[test]
fn new_job_is_queued_with_invariant_holding() {
    let j = job();
    assert_eq!(j.status, JobStatus::Queued);
    assert!(j.assigned_vm.is_none());
    assert!(j.invariant_holds());
    assert_eq!(j.max_retries, DEFAULT_MAX_RETRIES);
}

#[test]
fn assign_to_vm_transitions_and_sets_vm() {
    let mut j = job();
    let vm = VmId::new("vm-1");
    j.assign_to_vm(vm.clone(), 2_000).unwrap();
    assert_eq!(j.status, JobStatus::Assigned);
    assert_eq!(j.assigned_vm, Some(vm));
    assert_eq!(j.assigned_at_ms, Some(2_000));
    assert!(j.invariant_holds());
}

#[test]
fn assign_to_vm_rejects_non_queued() {
    let mut j = job();
    j.assign_to_vm(VmId::new("vm-1"), 2_000).unwrap();
    let err = j.assign_to_vm(VmId::new("vm-2"), 3_000).unwrap_err();
    assert_eq!(err.from, "assigned");
}

#[test]
fn full_lifecycle_to_completed() {
    let mut j = job();
    j.assign_to_vm(VmId::new("vm-1"), 1_000).unwrap();
    j.mark_running(2_000).unwrap();
    assert_eq!(j.status, JobStatus::Running);
    j.mark_completed(3_000).unwrap();
    assert_eq!(j.status, JobStatus::Completed);
    assert_eq!(j.completed_at_ms, Some(3_000));
    assert!(j.invariant_holds());
}

#[test]
fn terminal_jobs_reject_further_transitions() {
    let mut j = job();
    j.assign_to_vm(VmId::new("vm-1"), 1_000).unwrap();
    j.mark_failed(2_000).unwrap();
    assert!(j.mark_running(3_000).is_err());
    assert!(j.mark_completed(3_000).is_err());
    assert!(j.requeue().is_err());
}

#[test]
fn requeue_clears_assignment_and_bumps_retry_count() {
    let mut j = job();
    j.assign_to_vm(VmId::new("vm-1"), 1_000).unwrap();
    j.requeue().unwrap();
    assert_eq!(j.status, JobStatus::Queued);
    assert!(j.assigned_vm.is_none());
    assert_eq!(j.retry_count, 1);
    assert!(j.invariant_holds());
}

#[test]
fn can_retry_respects_max_retries() {
    let mut j = job();
    j.max_retries = 1;
    assert!(j.can_retry());
    j.retry_count = 1;
    assert!(!j.can_retry());
}

#[test]
fn invariant_holds_detects_inconsistent_state() {
    let mut j = job();
    j.status = JobStatus::Running;
    // Running without an assigned VM violates §8 property 3.
    assert!(!j.invariant_holds());
    j.assigned_vm = Some(VmId::new("vm-1"));
    assert!(j.invariant_holds());
}
