//! Shared error type across aihub crates.

use serde::Serialize;
use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Tenant id absent from the registry.
    UnknownTenant,
    /// Tenant exists but is switched off.
    TenantDisabled,
    /// Path matched no route rule.
    NotFound,
    /// Route matched a backend the tenant has not enabled.
    BackendDisabled,
    /// Backend credential could not be acquired.
    CredentialUnavailable,
    /// Tenant token budget exhausted.
    Throttled,
    /// Backend did not answer in time.
    BackendTimeout,
    /// Backend refused or failed the connection.
    BackendUnavailable,
    /// Caller went away before dispatch.
    ClientClosed,
    /// Request body over the configured limit.
    PayloadTooLarge,
    /// Invalid input or configuration.
    BadRequest,
    /// Internal server error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownTenant => "unknown_tenant",
            ErrorCode::TenantDisabled => "tenant_disabled",
            ErrorCode::NotFound => "not_found",
            ErrorCode::BackendDisabled => "backend_disabled",
            ErrorCode::CredentialUnavailable => "credential_unavailable",
            ErrorCode::Throttled => "throttled",
            ErrorCode::BackendTimeout => "backend_timeout",
            ErrorCode::BackendUnavailable => "backend_unavailable",
            ErrorCode::ClientClosed => "client_closed",
            ErrorCode::PayloadTooLarge => "payload_too_large",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Internal => "internal",
        }
    }

    /// HTTP status the boundary answers with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::UnknownTenant | ErrorCode::NotFound => 404,
            ErrorCode::TenantDisabled | ErrorCode::BackendDisabled => 403,
            ErrorCode::CredentialUnavailable | ErrorCode::BackendUnavailable => 502,
            ErrorCode::Throttled => 429,
            ErrorCode::BackendTimeout => 504,
            ErrorCode::ClientClosed => 499,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::BadRequest => 400,
            ErrorCode::Internal => 500,
        }
    }

    /// Whether the caller is invited to retry the same request later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Throttled | ErrorCode::BackendTimeout)
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("tenant disabled: {0}")]
    TenantDisabled(String),
    #[error("no route for path: {0}")]
    NotFound(String),
    #[error("backend {backend} not enabled for tenant {tenant}")]
    BackendDisabled { tenant: String, backend: &'static str },
    /// Carries provider detail for logs only; see [`GatewayError::public_message`].
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),
    #[error("throttled (remaining={remaining}, retry_after={retry_after_secs}s)")]
    Throttled { remaining: u64, retry_after_secs: u64 },
    #[error("backend timed out after {0}ms")]
    BackendTimeout(u64),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("client closed request")]
    ClientClosed,
    #[error("payload too large (limit {0} bytes)")]
    PayloadTooLarge(usize),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map internal error to a stable client-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::UnknownTenant(_) => ErrorCode::UnknownTenant,
            GatewayError::TenantDisabled(_) => ErrorCode::TenantDisabled,
            GatewayError::NotFound(_) => ErrorCode::NotFound,
            GatewayError::BackendDisabled { .. } => ErrorCode::BackendDisabled,
            GatewayError::CredentialUnavailable(_) => ErrorCode::CredentialUnavailable,
            GatewayError::Throttled { .. } => ErrorCode::Throttled,
            GatewayError::BackendTimeout(_) => ErrorCode::BackendTimeout,
            GatewayError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            GatewayError::ClientClosed => ErrorCode::ClientClosed,
            GatewayError::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            GatewayError::BadRequest(_) => ErrorCode::BadRequest,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to hand to callers. Backend and identity-provider text
    /// stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::UnknownTenant(id) => format!("tenant '{id}' is not registered"),
            GatewayError::TenantDisabled(id) => format!("tenant '{id}' is disabled"),
            GatewayError::NotFound(path) => format!("no backend route matches path '{path}'"),
            GatewayError::BackendDisabled { backend, .. } => {
                format!("backend '{backend}' is not enabled for this tenant")
            }
            GatewayError::CredentialUnavailable(_) => {
                "backend credential could not be acquired".to_string()
            }
            GatewayError::Throttled { retry_after_secs, .. } => {
                format!("rate limit exceeded, retry after {retry_after_secs}s")
            }
            GatewayError::BackendTimeout(_) => "backend did not respond in time".to_string(),
            GatewayError::BackendUnavailable(_) => "backend is unavailable".to_string(),
            GatewayError::ClientClosed => "client closed request".to_string(),
            GatewayError::PayloadTooLarge(limit) => {
                format!("request body exceeds {limit} bytes")
            }
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Structured error body returned for every failed request.
///
/// Shape is identical across tenants:
/// `{"error": "<code>", "message": "<text>", "tenant": "<id>"}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub tenant: String,
}

impl ErrorBody {
    pub fn new(err: &GatewayError, tenant: impl Into<String>) -> Self {
        Self {
            error: err.code().as_str(),
            message: err.public_message(),
            tenant: tenant.into(),
        }
    }

    /// Serialize to a JSON string. Falls back to a fixed body if encoding fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"error":"internal","message":"internal error","tenant":""}"#.to_string()
        })
    }
}
