// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingress: pulls job messages off the bus, deduplicates against JobStore,
//! enqueues (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use fc_adapters::{BusClient, BusMessage};
use fc_core::{Clock, JobKey};
use fc_storage::{JobStore, KvStore};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wire shape of a bus job message (spec §4.8: "must contain at minimum
/// `(installation, job, repo, labels)`").
#[derive(Debug, Clone, Deserialize)]
struct BusJobMessage {
    installation: i64,
    job: i64,
    owner: String,
    repo: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngressOutcome {
    Enqueued(JobKey),
    Duplicate(JobKey),
    InvalidMessage,
    TransientFailure,
}

/// One bus subscription's worth of ingress (spec §5 "one Ingress loop per
/// bus subscription").
pub struct Ingress<B: BusClient, K: KvStore, C: Clock> {
    bus: Arc<B>,
    job_store: Arc<JobStore<K>>,
    clock: C,
    pool_id: String,
}

impl<B: BusClient, K: KvStore, C: Clock> Ingress<B, K, C> {
    pub fn new(bus: Arc<B>, job_store: Arc<JobStore<K>>, clock: C, pool_id: impl Into<String>) -> Self {
        Self { bus, job_store, clock, pool_id: pool_id.into() }
    }

    /// Runs until `cancel` fires (spec §5 "Ingress stops receiving").
    pub async fn run(self: Arc<Self>, cancel: CancellationToken)
    where
        B: 'static,
        K: 'static,
        C: 'static,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.receive_one() => {
                    if matches!(outcome, None) {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
    }

    /// Pulls and processes exactly one message, or `None` if the bus had
    /// nothing to offer this poll.
    async fn receive_one(&self) -> Option<IngressOutcome> {
        let message = match self.bus.receive().await {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "bus receive failed");
                return None;
            }
        };
        Some(self.process(&message).await)
    }

    /// The §4.8 pipeline for a single message: validate, dedup, enqueue,
    /// then ack/nack per the outcome.
    pub async fn process(&self, message: &BusMessage) -> IngressOutcome {
        let parsed: BusJobMessage = match serde_json::from_slice(&message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "dropping malformed bus message");
                self.ack(message).await;
                return IngressOutcome::InvalidMessage;
            }
        };
        if parsed.installation == 0 || parsed.job == 0 || parsed.owner.is_empty() || parsed.repo.is_empty() {
            debug!("dropping bus message missing required fields (spec §6: job_id=0/installation_id=0/missing repo -> drop)");
            self.ack(message).await;
            return IngressOutcome::InvalidMessage;
        }

        let key = JobKey::new(parsed.installation, parsed.job);

        match self.job_store.get(key) {
            Ok(_) => {
                self.ack(message).await;
                IngressOutcome::Duplicate(key)
            }
            Err(fc_storage::StoreError::NotFound(_)) => {
                let now_ms = self.clock.epoch_ms();
                match self
                    .job_store
                    .enqueue(key, parsed.owner, parsed.repo, parsed.labels, self.pool_id.clone(), parsed.priority, now_ms)
                    .await
                {
                    Ok(_) => {
                        self.ack(message).await;
                        IngressOutcome::Enqueued(key)
                    }
                    Err(e) => {
                        warn!(job = %key, error = %e, "failed to enqueue job; nacking for redelivery");
                        self.nack(message).await;
                        IngressOutcome::TransientFailure
                    }
                }
            }
            Err(e) => {
                warn!(job = %key, error = %e, "job lookup failed; nacking for redelivery");
                self.nack(message).await;
                IngressOutcome::TransientFailure
            }
        }
    }

    async fn ack(&self, message: &BusMessage) {
        if let Err(e) = self.bus.ack(message).await {
            warn!(error = %e, "failed to ack bus message");
        }
    }

    async fn nack(&self, message: &BusMessage) {
        if let Err(e) = self.bus.nack(message).await {
            warn!(error = %e, "failed to nack bus message");
        }
    }
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod tests;
