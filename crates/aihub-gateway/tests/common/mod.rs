//! Shared fakes and builders for gateway integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;

use aihub_core::error::{GatewayError, Result};
use aihub_core::route::BackendCategory;
use aihub_gateway::app_state::AppState;
use aihub_gateway::auth::{AccessToken, TokenSource};
use aihub_gateway::config::{self, TenantConfig, TenantPolicy, TenantRateLimit};
use aihub_gateway::context::Tenant;
use aihub_gateway::dispatch::{Backend, BackendResponse, BackendSet, ForwardRequest};
use aihub_gateway::obs::{DiagnosticRecord, DiagnosticsSink};
use aihub_gateway::pipeline::InboundRequest;

pub const WLRS: &str = "wlrs-water-form-assistant";

pub const BASE_CONFIG: &str = r#"
version: 1
backends:
  timeout_ms: 200
tenants:
  - id: "wlrs-water-form-assistant"
    display_name: "WLRS Water Form Assistant"
    rate_limit: { tokens_per_minute: 1000 }
    policy:
      usage_logging: true
      pii_redaction: { enabled: true, mode: fail_open }
  - id: "tiny"
    rate_limit: { tokens_per_minute: 2 }
  - id: "dormant"
    enabled: false
  - id: "openai-only"
    backends: [openai]
  - id: "streamer"
    policy: { streaming_metrics: true }
"#;

/// Records every forwarded request and answers with a canned response.
pub struct FakeBackend {
    pub seen: Mutex<Vec<ForwardRequest>>,
    delay: Duration,
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
}

impl FakeBackend {
    pub fn ok() -> Self {
        Self::new(StatusCode::OK, "application/json", r#"{"status":"succeeded"}"#)
    }

    pub fn new(status: StatusCode, content_type: &'static str, body: &'static str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            status,
            content_type,
            body,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_headers(&self) -> HeaderMap {
        self.seen.lock().unwrap().last().expect("no forwarded request").headers.clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn forward(&self, req: ForwardRequest) -> Result<BackendResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().unwrap().push(req);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        Ok(BackendResponse {
            status: self.status,
            headers,
            body: Body::from(self.body),
        })
    }
}

/// Mints `tok-<n>` tokens and counts fetches.
pub struct CountingTokenSource {
    pub fetches: AtomicU64,
    delay: Duration,
    lifetime: Duration,
}

impl CountingTokenSource {
    pub fn new() -> Self {
        Self::with(Duration::ZERO, Duration::from_secs(3600))
    }

    pub fn with(delay: Duration, lifetime: Duration) -> Self {
        Self {
            fetches: AtomicU64::new(0),
            delay,
            lifetime,
        }
    }

    pub fn count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn fetch(&self, _audience: &str) -> Result<AccessToken> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken::new(format!("tok-{n}"), Instant::now() + self.lifetime))
    }
}

/// Succeeds `ok_times` times, then fails with provider-looking detail.
pub struct FlakyTokenSource {
    calls: AtomicU64,
    ok_times: u64,
    lifetime: Duration,
}

impl FlakyTokenSource {
    pub fn failing() -> Self {
        Self::new(0, Duration::from_secs(3600))
    }

    pub fn new(ok_times: u64, lifetime: Duration) -> Self {
        Self {
            calls: AtomicU64::new(0),
            ok_times,
            lifetime,
        }
    }
}

#[async_trait]
impl TokenSource for FlakyTokenSource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn fetch(&self, _audience: &str) -> Result<AccessToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.ok_times {
            return Ok(AccessToken::new("flaky-tok", Instant::now() + self.lifetime));
        }
        Err(GatewayError::CredentialUnavailable(
            "IMDS 169.254.169.254 connection refused".into(),
        ))
    }
}

/// Sink that always fails.
pub struct FailingSink;

impl DiagnosticsSink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn emit(&self, _rec: &DiagnosticRecord<'_>) -> Result<()> {
        Err(GatewayError::Internal("sink offline".into()))
    }
}

pub fn both(backend: Arc<FakeBackend>) -> BackendSet {
    BackendSet::new()
        .with(BackendCategory::DocumentIntelligence, backend.clone())
        .with(BackendCategory::OpenAI, backend)
}

pub fn state(yaml: &str, source: Arc<dyn TokenSource>, backends: BackendSet) -> AppState {
    let cfg = config::load_from_str(yaml).expect("test config must parse");
    AppState::builder(cfg)
        .token_source(source)
        .backends(backends)
        .build()
        .expect("state must build")
}

pub fn default_state(backend: Arc<FakeBackend>) -> AppState {
    state(BASE_CONFIG, Arc::new(CountingTokenSource::new()), both(backend))
}

pub fn inbound(tenant: &str, path: &str, headers: HeaderMap) -> InboundRequest {
    InboundRequest {
        tenant_id: tenant.to_string(),
        method: Method::POST,
        path_and_query: path.to_string(),
        headers,
        body: Bytes::from_static(b"{}"),
    }
}

pub fn tenant(id: &str, tokens_per_minute: u32) -> Tenant {
    Tenant::from_config(&tenant_config(id, tokens_per_minute))
}

pub fn tenant_config(id: &str, tokens_per_minute: u32) -> TenantConfig {
    TenantConfig {
        id: id.to_string(),
        display_name: None,
        enabled: true,
        backends: vec![BackendCategory::DocumentIntelligence, BackendCategory::OpenAI],
        rate_limit: TenantRateLimit { tokens_per_minute },
        policy: TenantPolicy::default(),
    }
}

/// Serve `app` on an ephemeral localhost port.
pub async fn serve(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
