//! Per-request policy pipeline.
//!
//! `Received -> Matched -> Authenticated -> RateChecked -> Dispatched ->
//! Completed`, with `Errored` reachable from every non-terminal stage. The
//! first failing stage ends the request; nothing is retried here.
//!
//! Cancellation is honoured up to dispatch. A cancelled request never takes
//! rate-limit tokens if it is cancelled before the admission check; tokens
//! taken before a later cancellation are kept.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use aihub_core::error::{GatewayError, Result};
use aihub_core::route::RouteTable;

use crate::auth::AuthRewriter;
use crate::context::{Outcome, RequestContext, Stage, Tenant, TenantRegistry};
use crate::dispatch::{BackendResponse, BackendSet, ForwardRequest};
use crate::obs::{Diagnostics, GatewayMetrics};
use crate::policy::{Admission, RateLimiter};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Inbound request after tenant extraction.
#[derive(Debug)]
pub struct InboundRequest {
    pub tenant_id: String,
    pub method: Method,
    /// Path (tenant prefix already removed) plus optional `?query`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Successful pass through the pipeline.
pub struct PipelineReply {
    pub request_id: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    pub remaining: u64,
}

/// Failed pass, with what the boundary needs to render it.
#[derive(Debug)]
pub struct PipelineError {
    pub error: GatewayError,
    pub tenant_id: String,
    pub request_id: String,
    pub remaining: Option<u64>,
}

pub struct Pipeline {
    registry: Arc<TenantRegistry>,
    routes: RouteTable,
    rewriter: AuthRewriter,
    limiter: Arc<RateLimiter>,
    backends: BackendSet,
    diagnostics: Diagnostics,
    request_cost: u32,
    backend_timeout: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TenantRegistry>,
        routes: RouteTable,
        rewriter: AuthRewriter,
        limiter: Arc<RateLimiter>,
        backends: BackendSet,
        diagnostics: Diagnostics,
        request_cost: u32,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            routes,
            rewriter,
            limiter,
            backends,
            diagnostics,
            request_cost,
            backend_timeout,
        }
    }

    pub fn rewriter(&self) -> &AuthRewriter {
        &self.rewriter
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        self.diagnostics.metrics()
    }

    pub async fn handle(
        &self,
        req: InboundRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<PipelineReply, PipelineError> {
        let mut ctx = RequestContext::new(
            Uuid::new_v4().to_string(),
            req.tenant_id,
            req.method,
            req.path_and_query,
            req.headers,
        );
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id,
            tenant = %ctx.tenant_id,
            category = tracing::field::Empty,
        );

        async move {
            match self.run(&mut ctx, req.body, cancel).await {
                Ok(resp) => Ok(self.complete(&mut ctx, resp)),
                Err(error) => {
                    ctx.fail(error.code());
                    self.diagnostics.record(&ctx, Outcome::Error(error.code()));
                    if error.code().http_status() >= 500 {
                        // Full provider detail goes to logs only.
                        tracing::warn!(error = %error, stage = "errored", "pipeline failed");
                    }
                    Err(PipelineError {
                        error,
                        remaining: ctx.remaining_tokens(),
                        tenant_id: ctx.tenant_id,
                        request_id: ctx.request_id,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse> {
        // Received -> Matched
        let tenant = self.registry.resolve(&ctx.tenant_id)?;
        ctx.tenant = Some(Arc::clone(&tenant));
        if !tenant.enabled {
            return Err(GatewayError::TenantDisabled(tenant.id.clone()));
        }
        tag_policy(ctx, &tenant);

        let category = self.routes.classify(&ctx.path);
        ctx.category = Some(category);
        if !category.is_matched() {
            let path = ctx.path.split_once('?').map_or(ctx.path.as_str(), |(p, _)| p);
            return Err(GatewayError::NotFound(path.to_string()));
        }
        ctx.advance(Stage::Matched);
        tracing::Span::current().record("category", category.as_str());

        if !tenant.backend_enabled(category) {
            return Err(GatewayError::BackendDisabled {
                tenant: tenant.id.clone(),
                backend: category.as_str(),
            });
        }

        // Matched -> Authenticated
        let credential = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::ClientClosed),
            cred = self.rewriter.rewrite(category, &tenant) => cred?,
        };
        self.rewriter.apply(&mut ctx.headers, &credential, &tenant)?;
        ctx.credential = Some(credential);
        ctx.advance(Stage::Authenticated);

        // Authenticated -> RateChecked
        if cancel.is_cancelled() {
            return Err(GatewayError::ClientClosed);
        }
        let admission = self.limiter.admit(&tenant, self.request_cost);
        if admission == Admission::Revoked {
            // Reloaded away while in flight; report what the registry says now.
            return Err(match self.registry.resolve(&tenant.id) {
                Ok(_) => GatewayError::TenantDisabled(tenant.id.clone()),
                Err(e) => e,
            });
        }
        ctx.admission = Some(admission);
        if let Admission::Throttled { remaining, retry_after_secs } = admission {
            return Err(GatewayError::Throttled { remaining, retry_after_secs });
        }
        ctx.advance(Stage::RateChecked);

        // RateChecked -> Dispatched
        if cancel.is_cancelled() {
            return Err(GatewayError::ClientClosed);
        }
        let backend = self.backends.get(category).ok_or_else(|| {
            GatewayError::BackendUnavailable(format!("no backend configured for {category}"))
        })?;

        let mut headers = std::mem::take(&mut ctx.headers);
        if let Ok(v) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(X_REQUEST_ID, v);
        }
        let fwd = ForwardRequest {
            method: ctx.method.clone(),
            path_and_query: ctx.path.clone(),
            headers,
            body,
        };

        let timeout_ms = u64::try_from(self.backend_timeout.as_millis()).unwrap_or(u64::MAX);
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::ClientClosed),
            r = tokio::time::timeout(self.backend_timeout, backend.forward(fwd)) => match r {
                Ok(resp) => resp?,
                Err(_) => return Err(GatewayError::BackendTimeout(timeout_ms)),
            },
        };
        ctx.advance(Stage::Dispatched);
        Ok(resp)
    }

    fn complete(&self, ctx: &mut RequestContext, resp: BackendResponse) -> PipelineReply {
        ctx.advance(Stage::Completed);
        self.diagnostics
            .record(ctx, Outcome::Success(resp.status.as_u16()));

        let streaming_metrics = ctx
            .tenant
            .as_ref()
            .is_some_and(|t| t.policy.streaming_metrics);
        let body = if streaming_metrics && is_event_stream(&resp.headers) {
            count_stream_bytes(resp.body, Arc::clone(self.metrics()), ctx.tenant_id.clone())
        } else {
            resp.body
        };

        PipelineReply {
            request_id: ctx.request_id.clone(),
            status: resp.status,
            headers: resp.headers,
            body,
            remaining: ctx.remaining_tokens().unwrap_or(0),
        }
    }
}

fn tag_policy(ctx: &mut RequestContext, tenant: &Tenant) {
    let policy = tenant.policy;
    if policy.pii_redaction.enabled {
        ctx.tag("pii_redaction", policy.pii_redaction.mode.as_str());
    }
    if policy.intelligent_routing {
        ctx.tag("intelligent_routing", "on");
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

/// Relay `body` while adding each chunk's size to the tenant's stream counter.
fn count_stream_bytes(body: Body, metrics: Arc<GatewayMetrics>, tenant_id: String) -> Body {
    let stream = body.into_data_stream().inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            metrics
                .stream_bytes
                .add(&[("tenant", tenant_id.as_str())], bytes.len() as u64);
        }
    });
    Body::from_stream(stream)
}
