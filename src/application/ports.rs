//! Ports (interfaces) for the application layer.
//!
//! The ledger and admission policy only see these traits. Infrastructure
//! provides the adapters: Redis and in-memory counter stores, the system
//! clock, environment-backed limits.

use crate::application::error::StoreError;
use crate::domain::request::{CallerIdentity, RequestContext};
use crate::domain::window::UsageKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Port for a shared key-value counter store with expiring keys.
///
/// Adapters must not retry or cache: each call is one round-trip whose
/// failure is handed straight back so the ledger can fail open. Reads return
/// the raw stored text; interpreting it is the ledger's job.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Verify the store is reachable, establishing a connection if needed.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Read the raw value stored under `key`, `None` if absent or expired.
    async fn get(&self, key: &UsageKey) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value and expiring
    /// it after `ttl`.
    async fn set_with_expiry(
        &self,
        key: &UsageKey,
        value: u64,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

/// Port for obtaining the current wall-clock time.
///
/// Calendar time is needed to pick the month window, so unlike a monotonic
/// clock this returns a UTC timestamp.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Port for the anonymous monthly ceiling.
///
/// Queried on every check so the limit can change without a restart.
pub trait LimitProvider: Send + Sync + Debug {
    fn anonymous_limit(&self) -> u64;
}

/// Policy applied to authenticated callers.
///
/// The current policy admits everyone; this seam exists so a stricter one
/// can be dropped in without touching the anonymous path.
#[async_trait]
pub trait AuthenticatedPolicy: Send + Sync + Debug {
    async fn admit(&self, caller: &CallerIdentity, ctx: &RequestContext) -> bool;
}
