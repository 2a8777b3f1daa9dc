use std::net::SocketAddr;

use serde::Deserialize;
use aihub_core::error::{GatewayError, Result};
use aihub_core::route::{BackendCategory, RouteRule, RouteTable};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub backends: BackendsSection,

    #[serde(default)]
    pub credentials: CredentialsSection,

    /// Optional replacement for the built-in route table.
    #[serde(default)]
    pub routes: Option<Vec<RouteConfig>>,

    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GatewayError::BadRequest(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if self.tenants.is_empty() {
            return Err(GatewayError::BadRequest("tenants must not be empty".into()));
        }

        self.gateway.validate()?;
        self.backends.validate()?;
        self.credentials.validate()?;
        self.route_table()?;
        validate_tenants(&self.tenants, self.gateway.request_cost)?;

        Ok(())
    }

    /// Names of the sections other than `tenants` that differ in `next`.
    /// Hot reload applies tenants only, so these need a restart.
    pub fn static_changes(&self, next: &GatewayConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.version != next.version {
            changed.push("version");
        }
        if self.gateway != next.gateway {
            changed.push("gateway");
        }
        if self.backends != next.backends {
            changed.push("backends");
        }
        if self.credentials != next.credentials {
            changed.push("credentials");
        }
        if self.routes != next.routes {
            changed.push("routes");
        }
        changed
    }

    /// Compile the configured routes, or the default table when none are given.
    pub fn route_table(&self) -> Result<RouteTable> {
        match &self.routes {
            None => Ok(RouteTable::default()),
            Some(raw) => {
                let rules = raw
                    .iter()
                    .map(|r| RouteRule::new(&r.pattern, r.backend))
                    .collect::<Result<Vec<_>>>()?;
                RouteTable::new(rules)
            }
        }
    }
}

/// Tenant checks shared by startup validation and hot reload.
///
/// An enabled tenant whose bucket cannot hold one `request_cost` would be
/// throttled forever, so it is rejected here.
pub fn validate_tenants(tenants: &[TenantConfig], request_cost: u32) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for t in tenants {
        if t.id.trim().is_empty() {
            return Err(GatewayError::BadRequest("tenant id must not be empty".into()));
        }
        if !seen.insert(t.id.as_str()) {
            return Err(GatewayError::BadRequest(format!("duplicate tenant id: {}", t.id)));
        }
        if t.rate_limit.tokens_per_minute == 0 {
            return Err(GatewayError::BadRequest(format!(
                "tenant {}: rate_limit.tokens_per_minute must be >= 1",
                t.id
            )));
        }
        if t.enabled && t.rate_limit.tokens_per_minute < request_cost {
            return Err(GatewayError::BadRequest(format!(
                "tenant {}: rate_limit.tokens_per_minute ({}) is below gateway.request_cost ({request_cost})",
                t.id, t.rate_limit.tokens_per_minute
            )));
        }
        if t.backends.contains(&BackendCategory::Unmatched) {
            return Err(GatewayError::BadRequest(format!(
                "tenant {}: 'unmatched' is not a backend",
                t.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub tenant_source: TenantSource,

    /// Tokens charged per request against the tenant bucket.
    #[serde(default = "default_request_cost")]
    pub request_cost: u32,

    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Inbound bodies are buffered up to this size before forwarding.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tenant_source: TenantSource::default(),
            request_cost: default_request_cost(),
            drain_grace_ms: default_drain_grace_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.request_cost == 0 {
            return Err(GatewayError::BadRequest(
                "gateway.request_cost must be >= 1".into(),
            ));
        }
        if self.drain_grace_ms > 120_000 {
            return Err(GatewayError::BadRequest(
                "gateway.drain_grace_ms must be <= 120000".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(GatewayError::BadRequest(
                "gateway.max_body_bytes must be >= 1".into(),
            ));
        }
        if let TenantSource::Header { name } = &self.tenant_source {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(GatewayError::BadRequest(format!(
                    "gateway.tenant_source.name is not a valid header name: {name}"
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|_| {
            GatewayError::BadRequest(format!(
                "gateway.listen must be a valid socket address: {}",
                self.listen
            ))
        })
    }
}

/// Where the tenant id of an inbound request comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TenantSource {
    /// First path segment; stripped before forwarding.
    #[default]
    PathPrefix,
    /// Named request header.
    Header {
        #[serde(default = "default_tenant_header")]
        name: String,
    },
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_request_cost() -> u32 {
    1
}
fn default_drain_grace_ms() -> u64 {
    5000
}
fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_tenant_header() -> String {
    "x-tenant-id".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub openai: Option<BackendEndpoint>,

    #[serde(default)]
    pub document_intelligence: Option<BackendEndpoint>,
}

impl Default for BackendsSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            openai: None,
            document_intelligence: None,
        }
    }
}

impl BackendsSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.timeout_ms) {
            return Err(GatewayError::BadRequest(
                "backends.timeout_ms must be between 100 and 600000".into(),
            ));
        }
        for (name, ep) in self.endpoints() {
            if !(ep.url.starts_with("http://") || ep.url.starts_with("https://")) {
                return Err(GatewayError::BadRequest(format!(
                    "backends.{name}.url must start with http:// or https://"
                )));
            }
        }
        Ok(())
    }

    /// Configured endpoints keyed by category name.
    pub fn endpoints(&self) -> impl Iterator<Item = (&'static str, &BackendEndpoint)> {
        [
            ("openai", self.openai.as_ref()),
            ("document_intelligence", self.document_intelligence.as_ref()),
        ]
        .into_iter()
        .filter_map(|(n, ep)| ep.map(|ep| (n, ep)))
    }

    pub fn endpoint(&self, category: BackendCategory) -> Option<&BackendEndpoint> {
        match category {
            BackendCategory::OpenAI => self.openai.as_ref(),
            BackendCategory::DocumentIntelligence => self.document_intelligence.as_ref(),
            BackendCategory::Unmatched => None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendEndpoint {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    #[default]
    ManagedIdentity,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    #[serde(default)]
    pub mode: CredentialMode,

    /// User-assigned managed identity client id.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Env var holding the bearer value in `static` mode.
    #[serde(default = "default_static_token_env")]
    pub static_token_env: String,

    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            mode: CredentialMode::default(),
            client_id: None,
            static_token_env: default_static_token_env(),
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

impl CredentialsSection {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_skew_secs > 3600 {
            return Err(GatewayError::BadRequest(
                "credentials.refresh_skew_secs must be <= 3600".into(),
            ));
        }
        if self.mode == CredentialMode::Static && self.static_token_env.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "credentials.static_token_env must name an environment variable".into(),
            ));
        }
        Ok(())
    }
}

fn default_static_token_env() -> String {
    "AIHUB_STATIC_TOKEN".into()
}
fn default_refresh_skew_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub pattern: String,
    pub backend: BackendCategory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tenant_backends")]
    pub backends: Vec<BackendCategory>,

    #[serde(default)]
    pub rate_limit: TenantRateLimit,

    #[serde(default)]
    pub policy: TenantPolicy,
}

fn default_true() -> bool {
    true
}
fn default_tenant_backends() -> Vec<BackendCategory> {
    vec![BackendCategory::DocumentIntelligence, BackendCategory::OpenAI]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantRateLimit {
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u32,
}

impl Default for TenantRateLimit {
    fn default() -> Self {
        Self {
            tokens_per_minute: default_tokens_per_minute(),
        }
    }
}

fn default_tokens_per_minute() -> u32 {
    1000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PiiFailMode {
    FailOpen,
    #[default]
    FailClosed,
}

impl PiiFailMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PiiFailMode::FailOpen => "fail_open",
            PiiFailMode::FailClosed => "fail_closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PiiRedaction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: PiiFailMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TenantPolicy {
    #[serde(default)]
    pub pii_redaction: PiiRedaction,
    #[serde(default)]
    pub usage_logging: bool,
    #[serde(default)]
    pub streaming_metrics: bool,
    #[serde(default)]
    pub intelligent_routing: bool,
}
