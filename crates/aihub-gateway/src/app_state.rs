//! Shared application state for the aihub gateway.
//!
//! Startup errors are explicit (`Result` instead of panic). Only the tenant
//! set is hot-reloadable; every other section is fixed for the process
//! lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use aihub_core::error::{GatewayError, Result};

use crate::auth::{AuthRewriter, CredentialCache, ManagedIdentitySource, StaticTokenSource, TokenSource};
use crate::config::{CredentialMode, GatewayConfig, TenantSource};
use crate::context::TenantRegistry;
use crate::dispatch::BackendSet;
use crate::obs::{Diagnostics, DiagnosticsSink, GatewayMetrics};
use crate::pipeline::Pipeline;
use crate::policy::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    registry: Arc<TenantRegistry>,
    limiter: Arc<RateLimiter>,
    pipeline: Pipeline,
    metrics: Arc<GatewayMetrics>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build state with the token source and backends the config names.
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        let source: Arc<dyn TokenSource> = match cfg.credentials.mode {
            CredentialMode::ManagedIdentity => Arc::new(ManagedIdentitySource::from_env(
                cfg.credentials.client_id.clone(),
            )?),
            CredentialMode::Static => Arc::new(StaticTokenSource::from_env(
                &cfg.credentials.static_token_env,
            )?),
        };
        let backends = BackendSet::from_config(&cfg.backends)?;
        Self::builder(cfg).token_source(source).backends(backends).build()
    }

    pub fn builder(cfg: GatewayConfig) -> AppStateBuilder {
        AppStateBuilder {
            cfg,
            source: None,
            backends: BackendSet::new(),
            extra_sinks: Vec::new(),
        }
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn tenant_source(&self) -> &TenantSource {
        &self.inner.cfg.gateway.tenant_source
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner.cfg.gateway.max_body_bytes
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.inner.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.inner.metrics
    }

    /// Single-value metric lines computed at scrape time.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let cache = self.inner.pipeline.rewriter().cache();
        vec![
            ("aihub_tenants", self.inner.registry.snapshot().len() as u64),
            ("aihub_rate_buckets", self.inner.limiter.bucket_count() as u64),
            ("aihub_credential_refreshes_total", cache.refresh_count()),
            ("aihub_credential_failures_total", cache.failure_count()),
        ]
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }

    /// Parent of every request's cancellation token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Swap in the tenant set of `next`. Other sections are ignored with a
    /// warning when they changed.
    pub fn reload(&self, next: &GatewayConfig) -> Result<()> {
        let changed = self.inner.cfg.static_changes(next);
        if !changed.is_empty() {
            tracing::warn!(
                sections = ?changed,
                "only tenants are reloaded; restart to apply other config changes"
            );
        }

        match self.inner.registry.reload(&next.tenants) {
            Ok(snapshot) => {
                self.inner.limiter.sync_with(&snapshot);
                self.inner.metrics.config_reloads.inc(&[("result", "ok")]);
                Ok(())
            }
            Err(e) => {
                self.inner.metrics.config_reloads.inc(&[("result", "error")]);
                Err(e)
            }
        }
    }
}

pub struct AppStateBuilder {
    cfg: GatewayConfig,
    source: Option<Arc<dyn TokenSource>>,
    backends: BackendSet,
    extra_sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl AppStateBuilder {
    pub fn token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn backends(mut self, backends: BackendSet) -> Self {
        self.backends = backends;
        self
    }

    pub fn diagnostics_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let cfg = self.cfg;
        cfg.validate()?;

        let source = self
            .source
            .ok_or_else(|| GatewayError::Internal("token source not configured".into()))?;

        let registry = Arc::new(TenantRegistry::with_request_cost(
            &cfg.tenants,
            cfg.gateway.request_cost,
        )?);
        let limiter = Arc::new(RateLimiter::with_registry(Arc::clone(&registry)));
        let metrics = Arc::new(GatewayMetrics::default());

        let mut diagnostics = Diagnostics::new(Arc::clone(&metrics));
        for sink in self.extra_sinks {
            diagnostics = diagnostics.with_sink(sink);
        }

        let cache = CredentialCache::new(
            source,
            Duration::from_secs(cfg.credentials.refresh_skew_secs),
        );

        // Tenants that enable a backend with no endpoint will only ever see 502s.
        let snapshot = registry.snapshot();
        for t in snapshot.iter() {
            for category in t.backends() {
                if self.backends.get(category).is_none() {
                    tracing::warn!(tenant = %t.id, %category, "tenant enables a backend with no endpoint configured");
                }
            }
        }

        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            cfg.route_table()?,
            AuthRewriter::new(cache),
            Arc::clone(&limiter),
            self.backends,
            diagnostics,
            cfg.gateway.request_cost,
            Duration::from_millis(cfg.backends.timeout_ms),
        );

        Ok(AppState {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                limiter,
                pipeline,
                metrics,
                shutdown: CancellationToken::new(),
            }),
        })
    }
}
