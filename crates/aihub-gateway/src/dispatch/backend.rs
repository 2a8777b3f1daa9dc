use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use bytes::Bytes;
use futures_util::TryStreamExt;

use aihub_core::error::{GatewayError, Result};
use aihub_core::route::BackendCategory;

use crate::config::BackendsSection;

/// Request after auth rewriting, ready for a backend.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus optional `?query`, relative to the backend base URL.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Backend answer; the body streams through untouched.
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// A downstream service. Timeouts are enforced by the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    async fn forward(&self, req: ForwardRequest) -> Result<BackendResponse>;
}

/// Headers that describe one hop and must not be relayed.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for h in HOP_BY_HOP {
        headers.remove(h);
    }
    headers.remove(header::UPGRADE);
    headers.remove("keep-alive");
}

/// Forwards over HTTP(S) with `reqwest`.
pub struct HttpBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("backend http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, req: ForwardRequest) -> Result<BackendResponse> {
        let url = format!("{}{}", self.base_url, req.path_and_query);
        let mut headers = req.headers;
        strip_hop_by_hop(&mut headers);

        let resp = self
            .client
            .request(req.method, &url)
            .headers(headers)
            .body(req.body)
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(format!("{}: {e}", self.name)))?;

        let status = resp.status();
        let mut headers = resp.headers().clone();
        strip_hop_by_hop(&mut headers);
        let stream = resp.bytes_stream().map_err(std::io::Error::other);

        Ok(BackendResponse {
            status,
            headers,
            body: Body::from_stream(stream),
        })
    }
}

/// Backend per matched category.
#[derive(Default, Clone)]
pub struct BackendSet {
    backends: HashMap<BackendCategory, Arc<dyn Backend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `HttpBackend` per configured endpoint.
    pub fn from_config(cfg: &BackendsSection) -> Result<Self> {
        let connect_timeout = Duration::from_millis(cfg.timeout_ms);
        let mut set = Self::new();
        for category in [BackendCategory::OpenAI, BackendCategory::DocumentIntelligence] {
            if let Some(ep) = cfg.endpoint(category) {
                let backend = HttpBackend::new(category.as_str(), &ep.url, connect_timeout)?;
                set = set.with(category, Arc::new(backend));
            }
        }
        Ok(set)
    }

    pub fn with(mut self, category: BackendCategory, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(category, backend);
        self
    }

    pub fn get(&self, category: BackendCategory) -> Option<Arc<dyn Backend>> {
        self.backends.get(&category).cloned()
    }

    pub fn categories(&self) -> impl Iterator<Item = BackendCategory> + '_ {
        self.backends.keys().copied()
    }
}
