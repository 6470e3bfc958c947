//! Circuit breaker guarding the counter store.
//!
//! A degraded store already fails open on every call, but each of those calls
//! still waits for a connect or a timeout. After enough consecutive failures
//! the breaker opens and the ledger admits without touching the store at all.
//! Once the recovery timeout has passed the store is probed again and the
//! next outcome closes or reopens the breaker.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls go through.
    Closed = 0,
    /// Store considered down; checks are admitted without store calls.
    Open = 1,
    /// Probing: store calls go through until one succeeds or fails.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive store failures that open the breaker.
    pub failure_threshold: u32,
    /// How long to stay open before probing again.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Lock-free breaker shared by all concurrent checks of one ledger.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    opened_at_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failures: AtomicU32::new(0),
            opened_at_nanos: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the store should be contacted for this check.
    ///
    /// Returns `false` while open; the caller then admits without a store call.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.elapsed_since_open() < self.config.recovery_timeout {
                    return false;
                }
                // losers of the swap still probe if the winner already moved to HalfOpen
                self.state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                    || self.state() == CircuitState::HalfOpen
            }
        }
    }

    /// Record a store round-trip that completed.
    ///
    /// Ignored while open: a call that started before the breaker opened
    /// must not cut the recovery timeout short.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let closed = self
                    .state
                    .compare_exchange(
                        CircuitState::HalfOpen as u8,
                        CircuitState::Closed as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if closed {
                    self.failures.store(0, Ordering::Release);
                    tracing::info!("counter store recovered, circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a store round-trip that failed.
    pub fn record_failure(&self) {
        let failures = self
            .failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        let should_open = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            self.mark_opened();
            self.state.store(CircuitState::Open as u8, Ordering::Release);
            tracing::warn!(
                consecutive_failures = failures,
                recovery_timeout = ?self.config.recovery_timeout,
                "counter store failing, circuit opened"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    fn mark_opened(&self) {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.opened_at_nanos.store(nanos, Ordering::Release);
    }

    fn elapsed_since_open(&self) -> Duration {
        let opened_at =
            self.epoch + Duration::from_nanos(self.opened_at_nanos.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(opened_at)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Breaker handle shared between ledger clones.
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;
