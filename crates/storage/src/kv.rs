// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `KvStore`: the trait boundary standing in for the external key-value
//! medium (spec §1 Non-goals — "does not implement... the key-value store";
//! spec §6 "Persisted state layout"). JobStore and VMStore are schema and
//! logic layered on top of this trait; `InMemoryKv` is the only
//! implementation this crate ships, used for tests and single-process
//! deployments. A production deployment supplies its own implementation
//! (e.g. backed by etcd/Redis/Spanner) at the binary edge.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Keys whose value starts with `prefix`, ordered lexicographically.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// In-memory `KvStore`. Not durable across process restarts — JobStore and
/// VMStore hold their own in-process index on top of this, so restart
/// behavior for a real deployment depends entirely on the durability of
/// the production `KvStore` implementation, not on this one.
#[derive(Default)]
pub struct InMemoryKv {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .data
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
