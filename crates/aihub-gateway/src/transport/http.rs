//! Inbound HTTP proxy handler.
//!
//! Responsibilities:
//! - Extract the tenant id per `gateway.tenant_source`
//! - Buffer the request body (bounded)
//! - Run the policy pipeline
//! - Render pipeline results and errors as HTTP responses

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use aihub_core::error::{ErrorBody, GatewayError};

use crate::app_state::AppState;
use crate::config::TenantSource;
use crate::pipeline::{InboundRequest, PipelineError, PipelineReply, X_REQUEST_ID};

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// `Retry-After` hint for backend timeouts.
const TIMEOUT_RETRY_AFTER_SECS: u64 = 1;

/// Split the tenant id off an inbound request.
/// Returns `(tenant_id, path_and_query to forward)`; a missing tenant yields
/// an empty id, which the registry rejects.
pub fn extract_tenant(source: &TenantSource, uri: &Uri, headers: &HeaderMap) -> (String, String) {
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    match source {
        TenantSource::PathPrefix => {
            let trimmed = uri.path().trim_start_matches('/');
            let (tenant, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
            (tenant.to_string(), format!("/{rest}{query}"))
        }
        TenantSource::Header { name } => {
            let tenant = headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .trim()
                .to_string();
            (tenant, format!("{}{query}", uri.path()))
        }
    }
}

pub async fn proxy(State(app): State<AppState>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    let (tenant_id, path_and_query) = extract_tenant(app.tenant_source(), &parts.uri, &parts.headers);
    if let TenantSource::Header { name } = app.tenant_source() {
        // Consumed here; the rewriter sets `X-Tenant-Id` for the backend.
        parts.headers.remove(name.as_str());
    }

    let body = match read_body(body, app.max_body_bytes()).await {
        Ok(b) => b,
        Err(e) => return ErrorReply::new(e, tenant_id).into_response(),
    };

    let inbound = InboundRequest {
        tenant_id,
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    };

    // Dropping this future (client disconnect) abandons the request; the
    // token covers server shutdown.
    let cancel = app.shutdown_token().child_token();
    match app.pipeline().handle(inbound, &cancel).await {
        Ok(reply) => reply.into_response(),
        Err(err) => ErrorReply::from(err).into_response(),
    }
}

/// Buffer the body, failing with `PayloadTooLarge` past `limit` and
/// `BadRequest` when the stream itself breaks.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, "request body read failed");
            GatewayError::BadRequest("request body could not be read".into())
        })?;
        if buf.len().saturating_add(chunk.len()) > limit {
            return Err(GatewayError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

impl IntoResponse for PipelineReply {
    fn into_response(self) -> Response {
        let mut resp = Response::new(self.body);
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        let h = resp.headers_mut();
        h.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        if let Ok(v) = HeaderValue::from_str(&self.request_id) {
            h.insert(X_REQUEST_ID, v);
        }
        resp
    }
}

/// Structured JSON error with rate and retry metadata.
#[derive(Debug)]
pub struct ErrorReply {
    error: GatewayError,
    tenant: String,
    request_id: Option<String>,
    remaining: Option<u64>,
}

impl ErrorReply {
    pub fn new(error: GatewayError, tenant: impl Into<String>) -> Self {
        Self {
            error,
            tenant: tenant.into(),
            request_id: None,
            remaining: None,
        }
    }
}

impl From<PipelineError> for ErrorReply {
    fn from(e: PipelineError) -> Self {
        Self {
            error: e.error,
            tenant: e.tenant_id,
            request_id: Some(e.request_id),
            remaining: e.remaining,
        }
    }
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let code = self.error.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::new(&self.error, self.tenant);

        let mut resp = (status, Json(body)).into_response();
        let h = resp.headers_mut();
        match &self.error {
            GatewayError::Throttled { remaining, retry_after_secs } => {
                h.insert(X_RATELIMIT_REMAINING, HeaderValue::from(*remaining));
                h.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            GatewayError::BackendTimeout(_) => {
                h.insert(
                    axum::http::header::RETRY_AFTER,
                    HeaderValue::from(TIMEOUT_RETRY_AFTER_SECS),
                );
            }
            _ => {}
        }
        if let (false, Some(remaining)) = (h.contains_key(X_RATELIMIT_REMAINING), self.remaining) {
            h.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
        }
        if let Some(v) = self.request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
            h.insert(X_REQUEST_ID, v);
        }
        resp
    }
}
