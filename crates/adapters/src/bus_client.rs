// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `BusClient`: the trait boundary standing in for the message bus
//! (spec §1 Non-goals — "does not implement the message bus"). Ingress
//! (`fc-engine`) pulls job messages through this trait; a real deployment
//! supplies an implementation wrapping e.g. a Pub/Sub or SQS client.

use async_trait::async_trait;

use crate::error::BusError;

/// One message pulled off the subscription, not yet acked.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub ack_id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait BusClient: Send + Sync {
    /// Pulls the next available message, or `None` if the subscription is
    /// currently empty (Ingress polls in a loop rather than blocking
    /// indefinitely, so cancellation can be observed between pulls).
    async fn receive(&self) -> Result<Option<BusMessage>, BusError>;

    async fn ack(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Requests redelivery (spec §4.8: "transient store failures Nack for
    /// later redelivery").
    async fn nack(&self, message: &BusMessage) -> Result<(), BusError>;
}
