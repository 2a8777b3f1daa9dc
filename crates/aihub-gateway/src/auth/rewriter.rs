//! Outbound header rewriting for matched routes.

use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use aihub_core::error::{GatewayError, Result};
use aihub_core::route::BackendCategory;

use crate::context::Tenant;

use super::credential::{Credential, CredentialCache};

pub const API_KEY: HeaderName = HeaderName::from_static("api-key");
pub const X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");

pub struct AuthRewriter {
    cache: CredentialCache,
}

impl AuthRewriter {
    pub fn new(cache: CredentialCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Resolve the credential a backend of `category` needs.
    pub async fn rewrite(&self, category: BackendCategory, tenant: &Tenant) -> Result<Credential> {
        let audience = category.audience().ok_or_else(|| {
            GatewayError::Internal(format!("no credential for category {category}"))
        })?;
        let token = self.cache.get(audience).await?;
        tracing::trace!(tenant = %tenant.id, %category, "credential resolved");
        Ok(Credential::new(token, audience))
    }

    /// Install the credential: bearer `Authorization`, no `api-key`, and an
    /// `X-Tenant-Id` that always names the resolved tenant.
    pub fn apply(&self, headers: &mut HeaderMap, credential: &Credential, tenant: &Tenant) -> Result<()> {
        headers.remove(API_KEY);
        headers.insert(AUTHORIZATION, credential.bearer_header()?);
        let tenant_value = HeaderValue::from_str(&tenant.id).map_err(|_| {
            GatewayError::BadRequest(format!("tenant id is not a valid header value: {}", tenant.id))
        })?;
        headers.insert(X_TENANT_ID, tenant_value);
        Ok(())
    }
}
