//! Process-local counter store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::counter::Counter;
use crate::error::StoreError;

/// An in-memory counter store.
///
/// A single mutex guards the whole map. Every operation is O(1) and the
/// lock is never held across an await point, so contention stays short.
/// Expired counters are treated as absent on access and removed by
/// [`sweep_expired`](MemoryStore::sweep_expired).
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired counter and return how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        before - counters.len()
    }

    /// Get the number of counters held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let counters = self.counters.lock();
        Ok(counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(Counter::value))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock();

        if let Some(existing) = counters.get(key) {
            if !existing.is_expired(now) {
                trace!(key = %key, "Counter already initialized");
                return Ok(false);
            }
        }

        counters.insert(key.to_string(), Counter::new(value, ttl, now));
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock();

        match counters.get_mut(key) {
            Some(counter) if !counter.is_expired(now) => Ok(Some(counter.increment())),
            Some(_) => {
                counters.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Periodically sweep expired counters from `store`.
///
/// The task runs until aborted through the returned handle.
pub fn spawn_sweeper(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired();
            if removed > 0 {
                debug!(removed, remaining = store.len(), "Swept expired counters");
            }
        }
    })
}
