// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lightweight in-process counters served by `GET /stats` (spec §6). No
//! external metrics sink is wired — only the counters themselves are in
//! scope.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SchedulerStats {
    assignments: AtomicU64,
    requeues: AtomicU64,
    ticks: AtomicU64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignment(&self) {
        self.assignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            assignments: self.assignments.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStatsSnapshot {
    pub assignments: u64,
    pub requeues: u64,
    pub ticks: u64,
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
