//! End-to-end admission scenarios against the in-memory store.

use anon_quota::infrastructure::mocks::{FailingStore, MockClock, StoreOp};
use anon_quota::{
    Admission, AdmissionDecision, CallerIdentity, Classification, MemoryCounterStore,
    QuotaConfig, RequestContext, SharedLimit, StaticLimit,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

fn setup(limit: u64) -> (Admission, Arc<MemoryCounterStore>, MockClock) {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 20, 8, 30, 0).unwrap());
    let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
    let admission = Admission::builder(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_limit_provider(Arc::new(StaticLimit(limit)))
        .build()
        .unwrap();
    (admission, store, clock)
}

fn browser(addr: &str) -> RequestContext {
    RequestContext::new(addr, "/api/chat/completions")
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
}

#[tokio::test]
async fn test_limit_three_admits_three_then_denies() {
    let (admission, store, _clock) = setup(3);
    let ctx = browser("198.51.100.20");

    let mut results = Vec::new();
    for _ in 0..4 {
        results.push(admission.evaluate(&ctx).await.allowed);
    }
    assert_eq!(results, vec![true, true, true, false]);

    let key = admission.ledger().key_for(&ctx.anonymous_identity());
    assert!(key.to_string().starts_with("anon_quota:2025-01:"));
    assert_eq!(store.peek(&key).as_deref(), Some("3"));
}

#[tokio::test]
async fn test_fingerprints_are_independent() {
    let (admission, _store, _clock) = setup(1);

    assert!(admission.evaluate(&browser("198.51.100.20")).await.allowed);
    assert!(!admission.evaluate(&browser("198.51.100.20")).await.allowed);

    // same address, different agent
    let other_agent = RequestContext::new("198.51.100.20", "/api/chat/completions")
        .with_user_agent("curl/8.4.0");
    assert!(admission.evaluate(&other_agent).await.allowed);

    // different address, same agent
    assert!(admission.evaluate(&browser("198.51.100.21")).await.allowed);
}

#[tokio::test]
async fn test_admin_path_bypasses_store() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 20, 8, 30, 0).unwrap());
    let store = Arc::new(FailingStore::unreachable());
    let admission = Admission::builder(store.clone())
        .with_clock(Arc::new(clock))
        .with_limit_provider(Arc::new(StaticLimit(0)))
        .build()
        .unwrap();

    for ctx in [
        RequestContext::new("198.51.100.20", "/admin/users"),
        RequestContext::new("198.51.100.20", "/api/v1/admin/config"),
        RequestContext::new("198.51.100.20", "/api/chat").with_query("admin=true"),
    ] {
        let decision = admission.evaluate(&ctx).await;
        assert_eq!(decision, AdmissionDecision::allow(Classification::AdminBypass));
    }

    assert_eq!(store.calls(StoreOp::Ping), 0);
    assert_eq!(store.calls(StoreOp::Get), 0);
    assert_eq!(store.calls(StoreOp::Set), 0);
    assert_eq!(admission.metrics().bypassed(), 3);
}

#[tokio::test]
async fn test_bypass_wins_over_exhausted_quota() {
    let (admission, _store, _clock) = setup(1);
    let ctx = browser("198.51.100.20");
    admission.evaluate(&ctx).await;
    assert!(!admission.evaluate(&ctx).await.allowed);

    let admin = ctx.clone().with_query("admin=true");
    assert!(admission.evaluate(&admin).await.allowed);
}

#[tokio::test]
async fn test_authenticated_caller_never_counted() {
    let (admission, store, _clock) = setup(0);
    let ctx = browser("198.51.100.20").with_caller(CallerIdentity::from_user_id("u-1842"));

    for _ in 0..5 {
        let decision = admission.evaluate(&ctx).await;
        assert_eq!(decision, AdmissionDecision::allow(Classification::Authenticated));
    }
    assert!(store.is_empty());
    assert_eq!(admission.metrics().authenticated_admitted(), 5);
}

#[tokio::test]
async fn test_anonymous_tagged_session_is_counted() {
    let (admission, _store, _clock) = setup(1);
    let ctx = browser("198.51.100.20").with_caller(CallerIdentity::from_user_id("anonymous_9c1e"));

    assert!(admission.evaluate(&ctx).await.allowed);
    let second = admission.evaluate(&ctx).await;
    assert_eq!(second, AdmissionDecision::deny(Classification::Anonymous));
}

#[tokio::test]
async fn test_limit_change_applies_immediately() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 20, 8, 30, 0).unwrap());
    let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
    let limit = SharedLimit::new(2);
    let admission = Admission::builder(store)
        .with_clock(Arc::new(clock))
        .with_limit_provider(Arc::new(limit.clone()))
        .build()
        .unwrap();
    let ctx = browser("198.51.100.20");

    assert!(admission.evaluate(&ctx).await.allowed);
    assert!(admission.evaluate(&ctx).await.allowed);
    assert!(!admission.evaluate(&ctx).await.allowed);

    limit.set(0);
    assert!(!admission.evaluate(&ctx).await.allowed);

    limit.set(10);
    assert!(admission.evaluate(&ctx).await.allowed);
}

#[tokio::test]
async fn test_enforce_reports_denial() {
    let (admission, _store, _clock) = setup(1);
    let ctx = browser("198.51.100.20");

    let decision = admission.enforce(&ctx).await.unwrap();
    assert_eq!(decision.classification, Classification::Anonymous);

    let denial = admission.enforce(&ctx).await.unwrap_err();
    assert_eq!(denial.status(), 403);
    assert_eq!(denial.header(), ("X-Chat-Status", "anonymous_limit_reached"));
    assert_eq!(denial.reason_code(), "ANONYMOUS_LIMIT_REACHED");
}

#[tokio::test]
async fn test_custom_scope_changes_keys() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 20, 8, 30, 0).unwrap());
    let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
    let config = QuotaConfig::builder().with_scope("staging_quota").build().unwrap();
    let admission = Admission::builder(store.clone())
        .with_clock(Arc::new(clock))
        .with_limit_provider(Arc::new(StaticLimit(5)))
        .with_config(config)
        .build()
        .unwrap();
    let ctx = browser("198.51.100.20");

    admission.evaluate(&ctx).await;
    let key = admission.ledger().key_for(&ctx.anonymous_identity());
    assert!(key.to_string().starts_with("staging_quota:2025-01:"));
    assert_eq!(store.peek(&key).as_deref(), Some("1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_for_one_identity() {
    let (admission, store, _clock) = setup(3);
    let ctx = browser("198.51.100.77");

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let admission = admission.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { admission.evaluate(&ctx).await })
        })
        .collect();

    let mut admitted = 0u64;
    for handle in handles {
        let decision = handle.await.unwrap();
        assert_eq!(decision.classification, Classification::Anonymous);
        if decision.allowed {
            admitted += 1;
        }
    }

    // read-then-write may overshoot under contention, but never undershoots
    assert!(admitted >= 3, "admitted {}", admitted);
    assert_eq!(admission.metrics().anonymous_admitted(), admitted);
    assert_eq!(admission.metrics().anonymous_denied(), 64 - admitted);
    assert_eq!(admission.metrics().failed_open(), 0);

    let key = admission.ledger().key_for(&ctx.anonymous_identity());
    let stored: u64 = store.peek(&key).unwrap().parse().unwrap();
    assert!((1..=3).contains(&stored), "stored {}", stored);
}
