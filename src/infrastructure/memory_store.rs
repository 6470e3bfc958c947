//! In-process counter store.
//!
//! A sharded concurrent map with per-key expiry, for single-instance
//! deployments and tests. Expiry is evaluated lazily against the injected
//! clock: an expired entry reads as absent and is dropped on next access or
//! on [`purge_expired`](MemoryCounterStore::purge_expired).
//!
//! Counters here are not shared between processes. Run more than one
//! instance of the service and each one counts separately.

use crate::application::error::StoreError;
use crate::application::ports::{Clock, CounterStore};
use crate::domain::window::UsageKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// DashMap-backed [`CounterStore`].
#[derive(Clone)]
pub struct MemoryCounterStore {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCounterStore")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Current raw value under `key`, ignoring expired entries.
    ///
    /// Direct read for inspection; does not go through the ledger.
    pub fn peek(&self, key: &UsageKey) -> Option<String> {
        self.live(&key.to_string()).map(|entry| entry.value)
    }

    /// Expiry deadline of a live entry.
    pub fn expires_at(&self, key: &UsageKey) -> Option<DateTime<Utc>> {
        self.live(&key.to_string()).map(|entry| entry.expires_at)
    }

    /// Store an arbitrary value, bypassing counter semantics.
    pub fn insert_raw(&self, key: &UsageKey, value: impl Into<String>, ttl: Duration) {
        let expires_at = self.deadline(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?.clone();
        if entry.expires_at > now {
            Some(entry)
        } else {
            self.entries
                .remove_if(key, |_, stale| stale.expires_at <= now);
            None
        }
    }

    fn deadline(&self, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Protocol(format!("invalid ttl: {}", e)))?;
        self.clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::Protocol("ttl overflows calendar".to_string()))
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &UsageKey) -> Result<Option<String>, StoreError> {
        Ok(self.peek(key))
    }

    async fn set_with_expiry(
        &self,
        key: &UsageKey,
        value: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = self.deadline(ttl)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}
