//! Configuration: static settings and live limit sources.
//!
//! Static settings (key scope, expiry, store address and timeout) are read
//! once into a [`QuotaConfig`]. The anonymous limit is different: it is a
//! [`LimitProvider`] queried on every check, so operators can change
//! `ANONYMOUS_CHAT_LIMIT` without restarting the service.

use crate::application::admission::{Admission, BypassRule};
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::ledger::{LedgerConfig, QuotaLedger, COUNTER_TTL, DEFAULT_STORE_TIMEOUT};
use crate::application::ports::{AuthenticatedPolicy, Clock, CounterStore, LimitProvider};
use crate::domain::window::DEFAULT_SCOPE;
use crate::infrastructure::clock::SystemClock;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the anonymous monthly limit.
pub const LIMIT_ENV: &str = "ANONYMOUS_CHAT_LIMIT";

/// Environment variable holding the counter store URL.
pub const STORE_URL_ENV: &str = "REDIS_URL";

/// Environment variable holding the per-call store timeout in milliseconds.
pub const STORE_TIMEOUT_ENV: &str = "ANONYMOUS_CHAT_STORE_TIMEOUT_MS";

/// Store address used when nothing else is configured.
pub const DEFAULT_STORE_URL: &str = "redis://redis:6379/";

/// Anonymous limit used when the environment does not provide one.
pub const DEFAULT_ANONYMOUS_LIMIT: u64 = 10;

/// Error returned when a configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Counter expiry must be greater than zero
    ZeroTtl,
    /// Store timeout must be greater than zero
    ZeroTimeout,
    /// Key scope must not be empty
    EmptyScope,
    /// Circuit breaker threshold must be greater than zero
    ZeroFailureThreshold,
    /// An environment variable held an unusable value
    InvalidValue { var: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroTtl => write!(f, "counter ttl must be greater than 0"),
            ConfigError::ZeroTimeout => write!(f, "store timeout must be greater than 0"),
            ConfigError::EmptyScope => write!(f, "counter key scope must not be empty"),
            ConfigError::ZeroFailureThreshold => {
                write!(f, "circuit breaker failure threshold must be greater than 0")
            }
            ConfigError::InvalidValue { var, value } => {
                write!(f, "invalid value {:?} for {}", value, var)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Static quota settings.
///
/// Deserializable so it can sit inside a host application's config file:
///
/// ```
/// use anon_quota::QuotaConfig;
///
/// let config: QuotaConfig = serde_json::from_str(r#"{"store_timeout_ms": 200}"#).unwrap();
/// assert_eq!(config.store_timeout().as_millis(), 200);
/// assert_eq!(config.scope, "anon_quota");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub scope: String,
    pub ttl_secs: u64,
    pub store_timeout_ms: u64,
    pub store_url: String,
    pub default_limit: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let breaker = CircuitBreakerConfig::default();
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            ttl_secs: COUNTER_TTL.as_secs(),
            store_timeout_ms: duration_millis(DEFAULT_STORE_TIMEOUT),
            store_url: DEFAULT_STORE_URL.to_string(),
            default_limit: DEFAULT_ANONYMOUS_LIMIT,
            breaker_failure_threshold: breaker.failure_threshold,
            breaker_recovery_secs: breaker.recovery_timeout.as_secs(),
        }
    }
}

impl QuotaConfig {
    pub fn builder() -> QuotaConfigBuilder {
        QuotaConfigBuilder {
            config: QuotaConfig::default(),
        }
    }

    /// Defaults overlaid with `REDIS_URL` and `ANONYMOUS_CHAT_STORE_TIMEOUT_MS`.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = QuotaConfig::builder();
        if let Ok(url) = std::env::var(STORE_URL_ENV) {
            if !url.trim().is_empty() {
                builder = builder.with_store_url(url.trim());
            }
        }
        if let Some(ms) = read_env_u64(STORE_TIMEOUT_ENV)? {
            builder = builder.with_store_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }

    /// Check invariants.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scope.is_empty() {
            return Err(ConfigError::EmptyScope);
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker_recovery_secs),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            scope: self.scope.clone(),
            ttl: self.ttl(),
            store_timeout: self.store_timeout(),
            breaker: self.circuit_breaker(),
        }
    }

    /// Limit source reading `ANONYMOUS_CHAT_LIMIT` per call, falling back to
    /// `default_limit`.
    pub fn env_limit(&self) -> EnvLimitProvider {
        EnvLimitProvider::new(self.default_limit)
    }
}

/// Builder for [`QuotaConfig`].
#[derive(Debug, Clone)]
pub struct QuotaConfigBuilder {
    config: QuotaConfig,
}

impl QuotaConfigBuilder {
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scope = scope.into();
        self
    }

    /// Counter expiry. Sub-second precision is dropped.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout_ms = duration_millis(timeout);
        self
    }

    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = url.into();
        self
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.config.default_limit = limit;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker_failure_threshold = breaker.failure_threshold;
        self.config.breaker_recovery_secs = breaker.recovery_timeout.as_secs();
        self
    }

    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<QuotaConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Reads the limit from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvLimitProvider {
    var: String,
    fallback: u64,
}

impl EnvLimitProvider {
    /// Read `ANONYMOUS_CHAT_LIMIT`, using `fallback` when unset or invalid.
    pub fn new(fallback: u64) -> Self {
        Self::with_var(LIMIT_ENV, fallback)
    }

    pub fn with_var(var: impl Into<String>, fallback: u64) -> Self {
        Self {
            var: var.into(),
            fallback,
        }
    }

    /// Current value of the variable, `None` when unset.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` when set to a non-integer.
    pub fn read(&self) -> Result<Option<u64>, ConfigError> {
        read_env_u64(&self.var)
    }
}

impl LimitProvider for EnvLimitProvider {
    fn anonymous_limit(&self) -> u64 {
        match self.read() {
            Ok(Some(limit)) => limit,
            Ok(None) => self.fallback,
            Err(e) => {
                tracing::warn!(error = %e, fallback = self.fallback, "using fallback anonymous limit");
                self.fallback
            }
        }
    }
}

/// Fixed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticLimit(pub u64);

impl LimitProvider for StaticLimit {
    fn anonymous_limit(&self) -> u64 {
        self.0
    }
}

/// Limit that can be changed at runtime from any handle.
#[derive(Debug, Clone, Default)]
pub struct SharedLimit {
    value: Arc<AtomicU64>,
}

impl SharedLimit {
    pub fn new(limit: u64) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(limit)),
        }
    }

    pub fn set(&self, limit: u64) {
        self.value.store(limit, Ordering::Relaxed);
    }
}

impl LimitProvider for SharedLimit {
    fn anonymous_limit(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Builder wiring a counter store, clock and limit source into an
/// [`Admission`].
///
/// ```
/// use anon_quota::{Admission, MemoryCounterStore, QuotaConfig, StaticLimit, SystemClock};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryCounterStore::new(Arc::new(SystemClock::new())));
/// let admission = Admission::builder(store)
///     .with_config(QuotaConfig::default())
///     .with_limit_provider(Arc::new(StaticLimit(20)))
///     .build()
///     .unwrap();
/// assert_eq!(admission.ledger().config().scope, "anon_quota");
/// ```
#[derive(Debug)]
pub struct AdmissionBuilder {
    store: Arc<dyn CounterStore>,
    clock: Option<Arc<dyn Clock>>,
    limits: Option<Arc<dyn LimitProvider>>,
    policy: Option<Arc<dyn AuthenticatedPolicy>>,
    bypass: BypassRule,
    config: QuotaConfig,
}

impl Admission {
    /// Start building an admission policy over `store`.
    ///
    /// Defaults: system clock, [`QuotaConfig::default`], limit read from
    /// `ANONYMOUS_CHAT_LIMIT`, every authenticated caller admitted.
    pub fn builder(store: Arc<dyn CounterStore>) -> AdmissionBuilder {
        AdmissionBuilder {
            store,
            clock: None,
            limits: None,
            policy: None,
            bypass: BypassRule::default(),
            config: QuotaConfig::default(),
        }
    }
}

impl AdmissionBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_limit_provider(mut self, limits: Arc<dyn LimitProvider>) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_authenticated_policy(mut self, policy: Arc<dyn AuthenticatedPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_bypass_rule(mut self, bypass: BypassRule) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_config(mut self, config: QuotaConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<Admission, ConfigError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let limits = self
            .limits
            .unwrap_or_else(|| Arc::new(self.config.env_limit()));
        let ledger = QuotaLedger::new(self.store, clock, self.config.ledger_config());

        let admission = Admission::new(ledger, limits).with_bypass_rule(self.bypass);
        Ok(match self.policy {
            Some(policy) => admission.with_authenticated_policy(policy),
            None => admission,
        })
    }
}

fn read_env_u64(var: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
