//! Chat endpoint guarded by the anonymous quota.
//!
//! # Quick Start
//!
//! 1. Start Redis:
//!    ```bash
//!    docker run -p 6379:6379 redis:7-alpine
//!    ```
//!
//! 2. Run the demo (from project root) with a small limit:
//!    ```bash
//!    REDIS_URL=redis://127.0.0.1:6379/ ANONYMOUS_CHAT_LIMIT=3 \
//!        cargo run --example chat_gate --features axum
//!    ```
//!
//! 3. Send a few chats; the fourth gets a 403:
//!    ```bash
//!    for i in 1 2 3 4; do
//!        curl -i -X POST http://127.0.0.1:3000/api/chat
//!    done
//!    ```
//!
//! Requests with an `x-user-id` header are treated as authenticated unless
//! the id starts with `anonymous_`. Anything under `/admin` is never counted.
//!
//! `ANONYMOUS_CHAT_LIMIT` is read per request, and stopping Redis mid-run
//! shows the fail-open path: requests keep succeeding and a warning is logged.

use anon_quota::{
    Admission, AdmissionDecision, CallerIdentity, QuotaConfig, QuotaLayer, RedisCounterStore,
};
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Stand-in for a real session layer: trusts an `x-user-id` header.
async fn resolve_caller(mut req: Request, next: Next) -> Response {
    let caller = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(CallerIdentity::from_user_id);
    if let Some(caller) = caller {
        req.extensions_mut().insert(caller);
    }
    next.run(req).await
}

async fn chat(Extension(decision): Extension<AdmissionDecision>) -> Json<AdmissionDecision> {
    Json(decision)
}

async fn admin_stats(Extension(admission): Extension<Admission>) -> String {
    let snapshot = admission.metrics().snapshot();
    format!(
        "{:#?}\nbreaker: {:?}\n",
        snapshot,
        admission.ledger().circuit_breaker().state()
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,anon_quota=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = QuotaConfig::from_env()?;
    info!(store = %config.store_url, timeout = ?config.store_timeout(), "starting chat gate");

    // Lazy: the server starts even if Redis is not up yet
    let store = RedisCounterStore::open(&config.store_url)?.with_timeout(config.store_timeout());
    let admission = Admission::builder(Arc::new(store))
        .with_config(config)
        .build()?;

    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/admin/stats", get(admin_stats))
        .layer(QuotaLayer::new(admission.clone()))
        .layer(middleware::from_fn(resolve_caller))
        .layer(Extension(admission));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
