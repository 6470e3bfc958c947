//! Counter store doubles for exercising failure paths.

use crate::application::error::StoreError;
use crate::application::ports::{Clock, CounterStore};
use crate::domain::window::UsageKey;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::MemoryCounterStore;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The three store operations, used to choose which ones fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    Ping,
    Get,
    Set,
}

/// Store that fails chosen operations and counts every call.
///
/// Operations that are not set to fail are served by an in-memory store, so
/// a `FailingStore::on(StoreOp::Set)` still answers reads.
#[derive(Debug)]
pub struct FailingStore {
    failing: BTreeSet<StoreOp>,
    error: StoreError,
    inner: MemoryCounterStore,
    calls: [AtomicUsize; 3],
}

impl FailingStore {
    /// Fail only `op`.
    pub fn on(op: StoreOp) -> Self {
        Self::on_ops([op])
    }

    /// Fail every listed operation.
    pub fn on_ops(ops: impl IntoIterator<Item = StoreOp>) -> Self {
        Self {
            failing: ops.into_iter().collect(),
            error: StoreError::Unreachable("connection refused".to_string()),
            inner: MemoryCounterStore::new(Arc::new(SystemClock::new())),
            calls: Default::default(),
        }
    }

    /// Every operation fails, as if the store host were down.
    pub fn unreachable() -> Self {
        Self::on_ops([StoreOp::Ping, StoreOp::Get, StoreOp::Set])
    }

    /// Error returned by failing operations.
    pub fn with_error(mut self, error: StoreError) -> Self {
        self.error = error;
        self
    }

    /// Serve non-failing operations from `clock`-driven storage.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inner = MemoryCounterStore::new(clock);
        self
    }

    /// Backing store for the operations that succeed.
    pub fn inner(&self) -> &MemoryCounterStore {
        &self.inner
    }

    /// How many times `op` was invoked.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls[op as usize].load(Ordering::SeqCst)
    }

    fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        self.calls[op as usize].fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&op) {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(StoreOp::Ping)?;
        self.inner.ping().await
    }

    async fn get(&self, key: &UsageKey) -> Result<Option<String>, StoreError> {
        self.enter(StoreOp::Get)?;
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &UsageKey,
        value: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::Set)?;
        self.inner.set_with_expiry(key, value, ttl).await
    }
}

/// Store whose every call takes `delay` before answering.
///
/// Pair with a shorter ledger store timeout to drive the timeout path.
#[derive(Debug)]
pub struct StallingStore {
    delay: Duration,
    inner: MemoryCounterStore,
}

impl StallingStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryCounterStore::new(Arc::new(SystemClock::new())),
        }
    }

    pub fn inner(&self) -> &MemoryCounterStore {
        &self.inner
    }
}

#[async_trait]
impl CounterStore for StallingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.ping().await
    }

    async fn get(&self, key: &UsageKey) -> Result<Option<String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &UsageKey,
        value: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_with_expiry(key, value, ttl).await
    }
}
