//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use aihub_core::error::{GatewayError, Result};

pub use schema::{
    BackendEndpoint, BackendsSection, CredentialMode, CredentialsSection, GatewayConfig,
    GatewaySection, PiiFailMode, PiiRedaction, TenantConfig, TenantPolicy, TenantRateLimit,
    TenantSource,
};

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| GatewayError::Internal(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s)
        .map_err(|e| GatewayError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
