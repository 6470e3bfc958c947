//! Monthly usage ledger for anonymous callers.
//!
//! One check is a read-modify-write against the shared counter store:
//!
//! 1. derive the key for the current month window
//! 2. read the counter (absent or malformed counts as 0)
//! 3. deny without writing if `count >= limit`
//! 4. otherwise write `count + 1` with a 31 day expiry and admit
//!
//! Steps 2-4 are two independent store calls with no lock around them.
//! Concurrent checks for the same identity can therefore both read the same
//! count and both admit, overshooting the limit slightly. That is accepted:
//! the quota is an approximate monthly budget, not an exact one.
//!
//! # Fail-Open
//!
//! Any store error or timeout is logged and the check admits. A broken store
//! must never take the chat service down with it.

use crate::application::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, SharedCircuitBreaker,
};
use crate::application::error::StoreError;
use crate::application::ports::{Clock, CounterStore};
use crate::domain::identity::AnonymousIdentity;
use crate::domain::window::{MonthWindow, UsageKey, DEFAULT_SCOPE};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Expiry written with every counter. Longer than any calendar month.
pub const COUNTER_TTL: Duration = Duration::from_secs(31 * 86_400);

/// Ceiling on each individual store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Tuning for a [`QuotaLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// First segment of every counter key
    pub scope: String,
    /// Expiry attached to each write
    pub ttl: Duration,
    /// Timeout applied to each store round-trip
    pub store_timeout: Duration,
    /// Breaker that skips the store after repeated failures
    pub breaker: CircuitBreakerConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            ttl: COUNTER_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// What a single ledger check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// Under the limit; the counter now holds `count`.
    Admitted { count: u64 },
    /// At or over the limit; the counter was left at `count`.
    Denied { count: u64 },
    /// The store failed or was skipped; admitted without counting.
    FailedOpen,
}

impl LedgerOutcome {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, LedgerOutcome::Denied { .. })
    }
}

/// Counts anonymous usage per identity per calendar month.
///
/// # Runtime
///
/// Each store call is bounded with `tokio::time::timeout`, so checks must be
/// awaited inside a Tokio runtime with the time driver enabled (the default
/// for `#[tokio::main]` and `#[tokio::test]`). Polling a check from another
/// executor panics when the first store call is bounded.
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    breaker: SharedCircuitBreaker,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::with_config(config.breaker.clone()));
        Self {
            store,
            clock,
            config,
            breaker,
        }
    }

    /// Month window the clock currently falls in.
    pub fn current_window(&self) -> MonthWindow {
        MonthWindow::containing(self.clock.now())
    }

    /// Key the next check for `identity` will use.
    pub fn key_for(&self, identity: &AnonymousIdentity) -> UsageKey {
        UsageKey::new(self.config.scope.clone(), self.current_window(), *identity)
    }

    /// Admit or deny one request for `identity` against `limit`.
    ///
    /// Returns `true` when admitted, including every fail-open case.
    pub async fn check_and_increment(&self, identity: &AnonymousIdentity, limit: u64) -> bool {
        self.check(identity, limit).await.is_admitted()
    }

    /// Like [`check_and_increment`](Self::check_and_increment) but reports
    /// what happened.
    pub async fn check(&self, identity: &AnonymousIdentity, limit: u64) -> LedgerOutcome {
        if !self.breaker.allow_request() {
            tracing::debug!("counter store circuit open, admitting without counting");
            return LedgerOutcome::FailedOpen;
        }

        let key = self.key_for(identity);
        match self.count_against(&key, limit).await {
            Ok(outcome) => {
                self.breaker.record_success();
                outcome
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    key = %key,
                    "counter store failed during anonymous quota check, admitting"
                );
                LedgerOutcome::FailedOpen
            }
        }
    }

    pub fn circuit_breaker(&self) -> &SharedCircuitBreaker {
        &self.breaker
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn count_against(&self, key: &UsageKey, limit: u64) -> Result<LedgerOutcome, StoreError> {
        self.bounded(self.store.ping()).await?;

        let stored = self.bounded(self.store.get(key)).await?;
        let count = parse_count(stored.as_deref(), key);

        if count >= limit {
            return Ok(LedgerOutcome::Denied { count });
        }

        let count = count.saturating_add(1);
        self.bounded(self.store.set_with_expiry(key, count, self.config.ttl))
            .await?;
        Ok(LedgerOutcome::Admitted { count })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout)))
    }
}

/// Interpret a stored counter. Anything unusable resets to 0.
fn parse_count(stored: Option<&str>, key: &UsageKey) -> u64 {
    let Some(text) = stored.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0;
    };
    match text.parse::<u64>() {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(
                error = %e,
                key = %key,
                value = text,
                "malformed usage counter, treating as 0"
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryCounterStore;
    use crate::infrastructure::mocks::{FailingStore, MockClock, StoreOp};
    use chrono::{TimeZone, Utc};

    fn setup() -> (QuotaLedger, Arc<MemoryCounterStore>, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let ledger = QuotaLedger::new(
            store.clone(),
            Arc::new(clock.clone()),
            LedgerConfig::default(),
        );
        (ledger, store, clock)
    }

    fn identity() -> AnonymousIdentity {
        AnonymousIdentity::derive("198.51.100.7", Some("Mozilla/5.0"))
    }

    #[tokio::test]
    async fn test_counts_up_to_limit() {
        let (ledger, _store, _clock) = setup();
        let id = identity();

        assert_eq!(ledger.check(&id, 2).await, LedgerOutcome::Admitted { count: 1 });
        assert_eq!(ledger.check(&id, 2).await, LedgerOutcome::Admitted { count: 2 });
        assert_eq!(ledger.check(&id, 2).await, LedgerOutcome::Denied { count: 2 });
    }

    #[tokio::test]
    async fn test_denial_does_not_write() {
        let (ledger, store, _clock) = setup();
        let id = identity();
        let key = ledger.key_for(&id);

        assert!(ledger.check_and_increment(&id, 1).await);
        assert!(!ledger.check_and_increment(&id, 1).await);
        assert!(!ledger.check_and_increment(&id, 1).await);
        assert_eq!(store.peek(&key).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let (ledger, store, _clock) = setup();
        let id = identity();
        assert!(!ledger.check_and_increment(&id, 0).await);
        assert_eq!(store.peek(&ledger.key_for(&id)), None);
    }

    #[tokio::test]
    async fn test_writes_expected_key_and_ttl() {
        let (ledger, store, clock) = setup();
        let id = identity();
        ledger.check_and_increment(&id, 5).await;

        let key = format!("anon_quota:2025-03:{}", id.to_hex());
        assert_eq!(ledger.key_for(&id).to_string(), key);
        assert_eq!(
            store.expires_at(&ledger.key_for(&id)),
            Some(clock.now() + chrono::Duration::days(31))
        );
    }

    #[tokio::test]
    async fn test_malformed_value_resets_to_zero() {
        let (ledger, store, _clock) = setup();
        let id = identity();
        let key = ledger.key_for(&id);
        store.insert_raw(&key, "not-a-number", COUNTER_TTL);

        assert_eq!(ledger.check(&id, 3).await, LedgerOutcome::Admitted { count: 1 });
        assert_eq!(store.peek(&key).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_get_failure_fails_open_without_write() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        let store = Arc::new(FailingStore::on(StoreOp::Get));
        let ledger = QuotaLedger::new(store.clone(), Arc::new(clock), LedgerConfig::default());

        assert_eq!(ledger.check(&identity(), 0).await, LedgerOutcome::FailedOpen);
        assert_eq!(store.calls(StoreOp::Set), 0);
    }

    #[tokio::test]
    async fn test_breaker_skips_store_after_repeated_failures() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        let store = Arc::new(FailingStore::on(StoreOp::Ping));
        let config = LedgerConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
            },
            ..LedgerConfig::default()
        };
        let ledger = QuotaLedger::new(store.clone(), Arc::new(clock), config);

        for _ in 0..5 {
            assert!(ledger.check_and_increment(&identity(), 1).await);
        }
        assert_eq!(store.calls(StoreOp::Ping), 2);
    }

    #[test]
    fn test_parse_count() {
        let key = UsageKey::anonymous(MonthWindow::new(2025, 1).unwrap(), identity());
        assert_eq!(parse_count(None, &key), 0);
        assert_eq!(parse_count(Some(""), &key), 0);
        assert_eq!(parse_count(Some("7"), &key), 7);
        assert_eq!(parse_count(Some(" 7\n"), &key), 7);
        assert_eq!(parse_count(Some("-1"), &key), 0);
        assert_eq!(parse_count(Some("1.5"), &key), 0);
    }
}
