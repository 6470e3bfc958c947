//! Admission counters for monitoring.
//!
//! Process-local and approximate; the authoritative usage lives in the
//! counter store.

use crate::domain::decision::{AdmissionDecision, Classification};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic admission statistics, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    anonymous_admitted: AtomicU64,
    anonymous_denied: AtomicU64,
    authenticated_admitted: AtomicU64,
    authenticated_denied: AtomicU64,
    bypassed: AtomicU64,
    /// Anonymous checks admitted because the store failed or the breaker was open
    failed_open: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished decision.
    pub(crate) fn record_decision(&self, decision: &AdmissionDecision) {
        let counter = match (decision.classification, decision.allowed) {
            (Classification::AdminBypass, _) => &self.inner.bypassed,
            (Classification::Anonymous, true) => &self.inner.anonymous_admitted,
            (Classification::Anonymous, false) => &self.inner.anonymous_denied,
            (Classification::Authenticated, true) => &self.inner.authenticated_admitted,
            (Classification::Authenticated, false) => &self.inner.authenticated_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_open(&self) {
        self.inner.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn anonymous_admitted(&self) -> u64 {
        self.inner.anonymous_admitted.load(Ordering::Relaxed)
    }

    pub fn anonymous_denied(&self) -> u64 {
        self.inner.anonymous_denied.load(Ordering::Relaxed)
    }

    pub fn authenticated_admitted(&self) -> u64 {
        self.inner.authenticated_admitted.load(Ordering::Relaxed)
    }

    pub fn authenticated_denied(&self) -> u64 {
        self.inner.authenticated_denied.load(Ordering::Relaxed)
    }

    pub fn bypassed(&self) -> u64 {
        self.inner.bypassed.load(Ordering::Relaxed)
    }

    pub fn failed_open(&self) -> u64 {
        self.inner.failed_open.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            anonymous_admitted: self.anonymous_admitted(),
            anonymous_denied: self.anonymous_denied(),
            authenticated_admitted: self.authenticated_admitted(),
            authenticated_denied: self.authenticated_denied(),
            bypassed: self.bypassed(),
            failed_open: self.failed_open(),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.inner.anonymous_admitted,
            &self.inner.anonymous_denied,
            &self.inner.authenticated_admitted,
            &self.inner.authenticated_denied,
            &self.inner.bypassed,
            &self.inner.failed_open,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub anonymous_admitted: u64,
    pub anonymous_denied: u64,
    pub authenticated_admitted: u64,
    pub authenticated_denied: u64,
    pub bypassed: u64,
    pub failed_open: u64,
}

impl MetricsSnapshot {
    /// Every decision counted.
    pub fn total(&self) -> u64 {
        self.anonymous_admitted
            .saturating_add(self.anonymous_denied)
            .saturating_add(self.authenticated_admitted)
            .saturating_add(self.authenticated_denied)
            .saturating_add(self.bypassed)
    }

    /// Share of anonymous checks that were denied (0.0 to 1.0).
    pub fn denial_rate(&self) -> f64 {
        let anonymous = self.anonymous_admitted.saturating_add(self.anonymous_denied);
        if anonymous == 0 {
            0.0
        } else {
            self.anonymous_denied as f64 / anonymous as f64
        }
    }
}
