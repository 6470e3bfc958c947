//! # anon-quota
//!
//! Monthly admission quotas for anonymous chat callers.
//!
//! Callers who never logged in are fingerprinted by client address and
//! `User-Agent`, and each fingerprint gets a fixed number of chat requests per
//! calendar month. Counters live in a shared key-value store (Redis in
//! production) so every service instance sees the same usage.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anon_quota::{Admission, QuotaConfig, RedisCounterStore, RequestContext};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QuotaConfig::from_env()?;
//! let store = RedisCounterStore::open(&config.store_url)?.with_timeout(config.store_timeout());
//! let admission = Admission::builder(Arc::new(store))
//!     .with_config(config)
//!     .build()?;
//!
//! let ctx = RequestContext::new("203.0.113.9", "/api/chat/completions")
//!     .with_user_agent("Mozilla/5.0");
//!
//! match admission.enforce(&ctx).await {
//!     Ok(decision) => println!("admitted as {}", decision.classification),
//!     Err(denial) => println!("rejected: {}", denial),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! With the `axum` feature, [`QuotaLayer`] does the same as Tower middleware
//! and answers denials with a ready-made 403.
//!
//! ## Admission Rules
//!
//! Checked in order, first match wins:
//!
//! 1. **Admin bypass**: the path contains `/admin` or the query contains
//!    `admin=true`. Admitted, no store access.
//! 2. **Anonymous**: no resolved caller, or a caller id starting with
//!    `anonymous_`. Counted against the monthly limit.
//! 3. **Authenticated**: anyone else. Passed to an [`AuthenticatedPolicy`],
//!    which by default ([`PermitAll`]) admits.
//!
//! The anonymous limit comes from `ANONYMOUS_CHAT_LIMIT`, re-read on every
//! request, so it can be tuned without a restart. A limit of 0 refuses every
//! anonymous request.
//!
//! ## Counter Keys
//!
//! ```text
//! anon_quota:2025-03:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! └─ scope ─┘└ month┘└───────────── sha256(address ":" user-agent) ─────────────┘
//! ```
//!
//! The month label changes at the first instant of each UTC month, which
//! starts every fingerprint at zero. Old counters expire on their own after
//! 31 days.
//!
//! ## Fail-Open Operation
//!
//! The quota protects a budget, not a security boundary. Whenever the store
//! errors, times out, or is skipped by the circuit breaker, the anonymous
//! request is admitted and a warning is logged:
//!
//! ```rust,no_run
//! # use anon_quota::{Admission, CircuitState, MemoryCounterStore, SystemClock};
//! # use std::sync::Arc;
//! # let store = Arc::new(MemoryCounterStore::new(Arc::new(SystemClock::new())));
//! # let admission = Admission::builder(store).build().unwrap();
//! match admission.ledger().circuit_breaker().state() {
//!     CircuitState::Closed => println!("counting normally"),
//!     CircuitState::Open => println!("store skipped, admitting everyone"),
//!     CircuitState::HalfOpen => println!("probing the store again"),
//! }
//! println!("failed open so far: {}", admission.metrics().failed_open());
//! ```
//!
//! ## Feature Flags
//!
//! - `redis-store` (default): [`RedisCounterStore`]
//! - `axum`: [`QuotaLayer`] middleware and `IntoResponse` for [`QuotaDenial`]
//! - `test-helpers`: mock clock, failing stores and a log-capturing layer

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub use domain::{
    decision::{
        AdmissionDecision, Classification, DenialReason, QuotaDenial, ANONYMOUS_LIMIT_REACHED,
        AUTHENTICATED_POLICY_REFUSED, DENIAL_STATUS, POLICY_REFUSED_HEADER_VALUE, STATUS_HEADER,
        STATUS_HEADER_VALUE,
    },
    identity::AnonymousIdentity,
    request::{CallerIdentity, RequestContext, ANONYMOUS_ID_PREFIX},
    window::{MonthWindow, UsageKey, DEFAULT_SCOPE},
};

pub use application::{
    admission::{Admission, BypassRule, PermitAll},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    error::StoreError,
    ledger::{LedgerConfig, LedgerOutcome, QuotaLedger, COUNTER_TTL, DEFAULT_STORE_TIMEOUT},
    metrics::{Metrics, MetricsSnapshot},
    ports::{AuthenticatedPolicy, Clock, CounterStore, LimitProvider},
};

pub use infrastructure::{
    clock::SystemClock,
    config::{
        AdmissionBuilder, ConfigError, EnvLimitProvider, QuotaConfig, QuotaConfigBuilder,
        SharedLimit, StaticLimit, LIMIT_ENV,
    },
    memory_store::MemoryCounterStore,
};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::RedisCounterStore;

#[cfg(feature = "axum")]
pub use infrastructure::layer::{QuotaLayer, QuotaService};
