//! Admission policy.
//!
//! Decides, per inbound chat request, whether it proceeds:
//!
//! - requests shaped like administrative traffic bypass every check
//! - anonymous callers are counted against the monthly [`QuotaLedger`]
//! - authenticated callers go through an [`AuthenticatedPolicy`], which
//!   admits everyone unless a stricter policy is plugged in
//!
//! The anonymous limit is read from the [`LimitProvider`] on every anonymous
//! request, and only then.

use crate::application::ledger::{LedgerOutcome, QuotaLedger};
use crate::application::metrics::Metrics;
use crate::application::ports::{AuthenticatedPolicy, LimitProvider};
use crate::domain::decision::{AdmissionDecision, Classification, QuotaDenial};
use crate::domain::request::{CallerIdentity, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Path fragment that marks administrative traffic.
pub const ADMIN_PATH_MARKER: &str = "/admin";

/// Query fragment that marks administrative traffic.
pub const ADMIN_QUERY_MARKER: &str = "admin=true";

/// Request shapes that skip quota enforcement entirely.
///
/// Matching is plain substring containment, so `/api/admin/users` and
/// `?debug=1&admin=true` both match, as does `/administer`. This is a
/// routing shortcut, not an access control: callers that can reach these
/// paths are trusted to be authorized further down the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassRule {
    path_marker: String,
    query_marker: String,
}

impl Default for BypassRule {
    fn default() -> Self {
        Self {
            path_marker: ADMIN_PATH_MARKER.to_string(),
            query_marker: ADMIN_QUERY_MARKER.to_string(),
        }
    }
}

impl BypassRule {
    pub fn new(path_marker: impl Into<String>, query_marker: impl Into<String>) -> Self {
        Self {
            path_marker: path_marker.into(),
            query_marker: query_marker.into(),
        }
    }

    /// True if the path contains the path marker or the query contains the
    /// query marker.
    ///
    /// ```
    /// use anon_quota::{BypassRule, RequestContext};
    ///
    /// let rule = BypassRule::default();
    /// assert!(rule.matches(&RequestContext::new("10.0.0.1", "/admin/users")));
    /// assert!(rule.matches(&RequestContext::new("10.0.0.1", "/chat").with_query("admin=true")));
    /// assert!(!rule.matches(&RequestContext::new("10.0.0.1", "/chat").with_query("admin=false")));
    /// ```
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        ctx.path().contains(self.path_marker.as_str())
            || ctx
                .query()
                .is_some_and(|q| q.contains(self.query_marker.as_str()))
    }
}

/// Authenticated policy that admits every caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

#[async_trait]
impl AuthenticatedPolicy for PermitAll {
    async fn admit(&self, _caller: &CallerIdentity, _ctx: &RequestContext) -> bool {
        true
    }
}

/// Entry point for admission decisions.
///
/// Cheap to clone; clones share the ledger, its circuit breaker and metrics.
#[derive(Debug, Clone)]
pub struct Admission {
    ledger: QuotaLedger,
    limits: Arc<dyn LimitProvider>,
    bypass: BypassRule,
    authenticated: Arc<dyn AuthenticatedPolicy>,
    metrics: Metrics,
}

impl Admission {
    /// Assemble from explicit parts. Authenticated callers are admitted
    /// and the default bypass rule applies.
    pub fn new(ledger: QuotaLedger, limits: Arc<dyn LimitProvider>) -> Self {
        Self {
            ledger,
            limits,
            bypass: BypassRule::default(),
            authenticated: Arc::new(PermitAll),
            metrics: Metrics::new(),
        }
    }

    pub fn with_bypass_rule(mut self, bypass: BypassRule) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_authenticated_policy(mut self, policy: Arc<dyn AuthenticatedPolicy>) -> Self {
        self.authenticated = policy;
        self
    }

    /// Classify `ctx` and decide whether it proceeds.
    ///
    /// Never fails: store problems on the anonymous path are absorbed by the
    /// ledger and admit the request.
    pub async fn evaluate(&self, ctx: &RequestContext) -> AdmissionDecision {
        match self.enforce(ctx).await {
            Ok(decision) => decision,
            Err(denial) => AdmissionDecision::deny(denial.classification()),
        }
    }

    /// Like [`evaluate`](Self::evaluate) but turns a denial into a
    /// [`QuotaDenial`].
    ///
    /// # Errors
    /// Returns `QuotaDenial` when an anonymous caller has spent this
    /// month's budget (`ANONYMOUS_LIMIT_REACHED`), or when a custom
    /// authenticated policy refuses (`AUTHENTICATED_POLICY_REFUSED`).
    pub async fn enforce(&self, ctx: &RequestContext) -> Result<AdmissionDecision, QuotaDenial> {
        let verdict = self.decide(ctx).await;
        match &verdict {
            Ok(decision) => self.metrics.record_decision(decision),
            Err(denial) => self
                .metrics
                .record_decision(&AdmissionDecision::deny(denial.classification())),
        }
        verdict
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn bypass_rule(&self) -> &BypassRule {
        &self.bypass
    }

    async fn decide(&self, ctx: &RequestContext) -> Result<AdmissionDecision, QuotaDenial> {
        if self.bypass.matches(ctx) {
            return Ok(self.bypassed(ctx));
        }
        match ctx.caller() {
            Some(caller) if !caller.is_anonymous() => self.authenticated(caller, ctx).await,
            _ => self.anonymous(ctx).await,
        }
    }

    fn bypassed(&self, ctx: &RequestContext) -> AdmissionDecision {
        tracing::debug!(path = ctx.path(), "admin request, skipping quota");
        AdmissionDecision::allow(Classification::AdminBypass)
    }

    async fn authenticated(
        &self,
        caller: &CallerIdentity,
        ctx: &RequestContext,
    ) -> Result<AdmissionDecision, QuotaDenial> {
        if self.authenticated.admit(caller, ctx).await {
            Ok(AdmissionDecision::allow(Classification::Authenticated))
        } else {
            tracing::info!(user = caller.id(), "authenticated caller refused by policy");
            Err(QuotaDenial::policy_refused(self.ledger.current_window()))
        }
    }

    async fn anonymous(&self, ctx: &RequestContext) -> Result<AdmissionDecision, QuotaDenial> {
        let limit = self.limits.anonymous_limit();
        let identity = ctx.anonymous_identity();
        match self.ledger.check(&identity, limit).await {
            LedgerOutcome::Admitted { count } => {
                tracing::trace!(identity = %identity, count, limit, "anonymous request admitted");
                Ok(AdmissionDecision::allow(Classification::Anonymous))
            }
            LedgerOutcome::FailedOpen => {
                self.metrics.record_failed_open();
                Ok(AdmissionDecision::allow(Classification::Anonymous))
            }
            LedgerOutcome::Denied { count } => {
                let window = self.ledger.current_window();
                tracing::info!(
                    identity = %identity,
                    count,
                    limit,
                    window = %window,
                    "anonymous chat limit reached"
                );
                Err(QuotaDenial::new(window, limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::LedgerConfig;
    use crate::infrastructure::config::{SharedLimit, StaticLimit};
    use crate::infrastructure::memory_store::MemoryCounterStore;
    use crate::infrastructure::mocks::{FailingStore, MockClock, StoreOp};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> MockClock {
        MockClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap())
    }

    fn admission(limit: u64) -> (Admission, Arc<MemoryCounterStore>) {
        let clock = clock();
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let ledger = QuotaLedger::new(store.clone(), Arc::new(clock), LedgerConfig::default());
        (Admission::new(ledger, Arc::new(StaticLimit(limit))), store)
    }

    fn anonymous_chat() -> RequestContext {
        RequestContext::new("203.0.113.9", "/api/chat/completions").with_user_agent("curl/8.4")
    }

    #[derive(Debug)]
    struct DenyAll;

    #[async_trait]
    impl AuthenticatedPolicy for DenyAll {
        async fn admit(&self, _caller: &CallerIdentity, _ctx: &RequestContext) -> bool {
            false
        }
    }

    #[derive(Debug, Clone, Default)]
    struct CountingLimit {
        reads: Arc<AtomicUsize>,
    }

    impl CountingLimit {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl LimitProvider for CountingLimit {
        fn anonymous_limit(&self) -> u64 {
            self.reads.fetch_add(1, Ordering::SeqCst);
            10
        }
    }

    #[test]
    fn test_bypass_rule_substrings() {
        let rule = BypassRule::default();
        let ctx = |path: &str, query: &str| RequestContext::new("a", path).with_query(query);

        assert!(rule.matches(&ctx("/api/admin/config", "")));
        assert!(rule.matches(&ctx("/chat", "x=1&admin=true")));
        assert!(rule.matches(&ctx("/administer", "")));
        assert!(!rule.matches(&ctx("/chat", "")));
        assert!(!rule.matches(&ctx("/chat", "admin=1")));
        assert!(!rule.matches(&ctx("/ADMIN", "")));
    }

    #[tokio::test]
    async fn test_anonymous_counts_then_denies() {
        let (admission, _store) = admission(2);
        let ctx = anonymous_chat();

        assert!(admission.evaluate(&ctx).await.allowed);
        assert!(admission.evaluate(&ctx).await.allowed);
        let third = admission.evaluate(&ctx).await;
        assert_eq!(third, AdmissionDecision::deny(Classification::Anonymous));

        assert_eq!(admission.metrics().anonymous_admitted(), 2);
        assert_eq!(admission.metrics().anonymous_denied(), 1);
    }

    #[tokio::test]
    async fn test_bypass_touches_nothing() {
        let clock = clock();
        let store = Arc::new(FailingStore::unreachable());
        let ledger = QuotaLedger::new(store.clone(), Arc::new(clock), LedgerConfig::default());
        let admission = Admission::new(ledger, Arc::new(StaticLimit(0)));

        let ctx = RequestContext::new("203.0.113.9", "/api/admin/users");
        let decision = admission.evaluate(&ctx).await;

        assert_eq!(decision, AdmissionDecision::allow(Classification::AdminBypass));
        assert_eq!(store.calls(StoreOp::Ping), 0);
        assert_eq!(store.calls(StoreOp::Get), 0);
        assert_eq!(store.calls(StoreOp::Set), 0);
        assert_eq!(admission.metrics().bypassed(), 1);
    }

    #[tokio::test]
    async fn test_authenticated_not_counted() {
        let (admission, store) = admission(0);
        let ctx = anonymous_chat().with_caller(CallerIdentity::from_user_id("user-77"));

        let decision = admission.evaluate(&ctx).await;
        assert_eq!(decision, AdmissionDecision::allow(Classification::Authenticated));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_tagged_anonymous_caller_is_counted() {
        let (admission, store) = admission(5);
        let ctx = anonymous_chat().with_caller(CallerIdentity::from_user_id("anonymous_x1"));

        let decision = admission.evaluate(&ctx).await;
        assert_eq!(decision, AdmissionDecision::allow(Classification::Anonymous));
        let key = admission.ledger().key_for(&ctx.anonymous_identity());
        assert_eq!(store.peek(&key).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_authenticated_policy_seam() {
        let (admission, _store) = admission(5);
        let admission = admission.with_authenticated_policy(Arc::new(DenyAll));
        let ctx = anonymous_chat().with_caller(CallerIdentity::from_user_id("user-77"));

        assert_eq!(
            admission.evaluate(&ctx).await,
            AdmissionDecision::deny(Classification::Authenticated)
        );
        assert_eq!(admission.metrics().authenticated_denied(), 1);
    }

    #[tokio::test]
    async fn test_policy_refusal_is_not_a_quota_signal() {
        let (admission, _store) = admission(7);
        let admission = admission.with_authenticated_policy(Arc::new(DenyAll));
        let ctx = anonymous_chat().with_caller(CallerIdentity::from_user_id("user-77"));

        let denial = admission.enforce(&ctx).await.unwrap_err();
        assert_eq!(denial.reason_code(), "AUTHENTICATED_POLICY_REFUSED");
        assert_eq!(denial.limit(), None);
        assert_ne!(denial.header().1, "anonymous_limit_reached");
        assert_eq!(admission.metrics().authenticated_denied(), 1);
        assert_eq!(admission.metrics().anonymous_denied(), 0);
    }

    #[tokio::test]
    async fn test_limit_only_read_for_anonymous_callers() {
        let (admission, _store) = admission(0);
        let limits = CountingLimit::default();
        let admission = Admission::new(admission.ledger().clone(), Arc::new(limits.clone()));

        admission
            .evaluate(&RequestContext::new("203.0.113.9", "/api/admin/users"))
            .await;
        admission
            .evaluate(&anonymous_chat().with_caller(CallerIdentity::from_user_id("user-77")))
            .await;
        assert_eq!(limits.reads(), 0);

        admission.evaluate(&anonymous_chat()).await;
        assert_eq!(limits.reads(), 1);
    }

    #[tokio::test]
    async fn test_enforce_denial_carries_limit_and_window() {
        let (admission, _store) = admission(1);
        let ctx = anonymous_chat();

        assert!(admission.enforce(&ctx).await.is_ok());
        let denial = admission.enforce(&ctx).await.unwrap_err();
        assert_eq!(denial.limit(), Some(1));
        assert_eq!(denial.window().to_string(), "2025-06");
        assert_eq!(denial.reason_code(), "ANONYMOUS_LIMIT_REACHED");
    }

    #[tokio::test]
    async fn test_limit_read_per_request() {
        let clock = clock();
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let ledger = QuotaLedger::new(store, Arc::new(clock), LedgerConfig::default());
        let limit = SharedLimit::new(1);
        let admission = Admission::new(ledger, Arc::new(limit.clone()));
        let ctx = anonymous_chat();

        assert!(admission.evaluate(&ctx).await.allowed);
        assert!(!admission.evaluate(&ctx).await.allowed);

        limit.set(3);
        assert!(admission.evaluate(&ctx).await.allowed);
    }

    #[tokio::test]
    async fn test_store_outage_admits_and_counts_failed_open() {
        let clock = clock();
        let store = Arc::new(FailingStore::unreachable());
        let ledger = QuotaLedger::new(store, Arc::new(clock), LedgerConfig::default());
        let admission = Admission::new(ledger, Arc::new(StaticLimit(0)));

        let decision = admission.evaluate(&anonymous_chat()).await;
        assert_eq!(decision, AdmissionDecision::allow(Classification::Anonymous));
        assert_eq!(admission.metrics().failed_open(), 1);
    }
}
