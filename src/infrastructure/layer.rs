//! Axum/Tower middleware enforcing the anonymous quota.
//!
//! [`QuotaLayer`] wraps chat routes. For each request it builds a
//! [`RequestContext`] from:
//!
//! - the peer address from `ConnectInfo<SocketAddr>` (`"unknown"` if the
//!   server was not started with connect info)
//! - the `User-Agent` header
//! - the URI path and raw query
//! - a [`CallerIdentity`] placed in the request extensions by an earlier
//!   authentication layer, if any
//!
//! Denied requests get a 403 with body `{"detail": "ANONYMOUS_LIMIT_REACHED"}`
//! and `X-Chat-Status: anonymous_limit_reached`. A refusal by a custom
//! authenticated policy uses `AUTHENTICATED_POLICY_REFUSED` and
//! `authenticated_policy_refused` instead. Admitted requests carry the
//! [`AdmissionDecision`] in their extensions for handlers to read.
//!
//! ```rust,no_run
//! use anon_quota::{Admission, QuotaLayer, RedisCounterStore};
//! use axum::{routing::post, Router};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCounterStore::open("redis://redis:6379/")?;
//! let admission = Admission::builder(Arc::new(store)).build()?;
//!
//! let app: Router = Router::new()
//!     .route("/api/chat", post(|| async { "ok" }))
//!     .layer(QuotaLayer::new(admission));
//! # Ok(())
//! # }
//! ```

use crate::application::admission::Admission;
use crate::domain::decision::{AdmissionDecision, QuotaDenial};
use crate::domain::request::{CallerIdentity, RequestContext};
use axum::extract::{ConnectInfo, Request};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Client address used when the peer address is not available.
pub const UNKNOWN_CLIENT: &str = "unknown";

static CHAT_STATUS: HeaderName = HeaderName::from_static("x-chat-status");

impl IntoResponse for QuotaDenial {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.reason_code() });
        let (_, marker) = self.header();
        let mut response = (StatusCode::FORBIDDEN, Json(body)).into_response();
        response
            .headers_mut()
            .insert(CHAT_STATUS.clone(), HeaderValue::from_static(marker));
        response
    }
}

/// Build the admission context for an incoming request.
pub fn request_context(req: &Request) -> RequestContext {
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let mut ctx = RequestContext::new(client_addr, req.uri().path());
    if let Some(query) = req.uri().query() {
        ctx = ctx.with_query(query);
    }
    if let Some(agent) = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_user_agent(agent);
    }
    if let Some(caller) = req.extensions().get::<CallerIdentity>() {
        ctx = ctx.with_caller(caller.clone());
    }
    ctx
}

/// Quota middleware layer
#[derive(Debug, Clone)]
pub struct QuotaLayer {
    admission: Admission,
}

impl QuotaLayer {
    pub fn new(admission: Admission) -> Self {
        Self { admission }
    }
}

impl<S> Layer<S> for QuotaLayer {
    type Service = QuotaService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        QuotaService {
            inner,
            admission: self.admission.clone(),
        }
    }
}

/// Quota middleware service
#[derive(Debug, Clone)]
pub struct QuotaService<S> {
    inner: S,
    admission: Admission,
}

impl<S> Service<Request> for QuotaService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let admission = self.admission.clone();
        // Take the service that was driven ready, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let ctx = request_context(&req);
            match admission.enforce(&ctx).await {
                Ok(decision) => {
                    req.extensions_mut().insert::<AdmissionDecision>(decision);
                    inner.call(req).await
                }
                Err(denial) => Ok(denial.into_response()),
            }
        })
    }
}
