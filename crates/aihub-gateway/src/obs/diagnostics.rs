//! Diagnostics emitter.
//!
//! `record` is write-only and best-effort: a failing sink is counted and
//! logged at debug, and the request carries on.

use std::sync::Arc;
use std::time::Duration;

use aihub_core::error::Result;

use crate::context::{Outcome, RequestContext};

use super::metrics::GatewayMetrics;

/// Metric label for requests whose tenant id did not resolve.
pub const UNRESOLVED_TENANT: &str = "unknown";

/// Flattened view of a finished request handed to every sink.
#[derive(Debug)]
pub struct DiagnosticRecord<'a> {
    pub request_id: &'a str,
    /// Tenant id as the caller sent it.
    pub tenant_id: &'a str,
    /// Registered tenant id, or [`UNRESOLVED_TENANT`]. Metrics label with
    /// this so caller-chosen ids never create new series.
    pub tenant_label: &'a str,
    pub category: &'static str,
    pub stage: &'static str,
    pub remaining: Option<u64>,
    pub outcome: Outcome,
    pub latency: Duration,
    pub usage_logging: bool,
    pub tags: &'a [(&'static str, String)],
}

impl<'a> DiagnosticRecord<'a> {
    pub fn from_context(ctx: &'a RequestContext, outcome: Outcome) -> Self {
        Self {
            request_id: &ctx.request_id,
            tenant_id: &ctx.tenant_id,
            tenant_label: ctx
                .tenant
                .as_ref()
                .map_or(UNRESOLVED_TENANT, |t| t.id.as_str()),
            category: ctx.category.map_or("none", |c| c.as_str()),
            stage: ctx.stage().as_str(),
            remaining: ctx.remaining_tokens(),
            outcome,
            latency: ctx.elapsed(),
            usage_logging: ctx
                .tenant
                .as_ref()
                .is_some_and(|t| t.policy.usage_logging),
            tags: &ctx.tags,
        }
    }
}

pub trait DiagnosticsSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn emit(&self, rec: &DiagnosticRecord<'_>) -> Result<()>;
}

/// Structured `tracing` events.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn emit(&self, rec: &DiagnosticRecord<'_>) -> Result<()> {
        let latency_ms = u64::try_from(rec.latency.as_millis()).unwrap_or(u64::MAX);
        let remaining = rec.remaining.map_or(-1, |r| i64::try_from(r).unwrap_or(i64::MAX));
        match rec.outcome {
            Outcome::Success(status) => {
                tracing::debug!(
                    target: "aihub::diagnostics",
                    request_id = rec.request_id,
                    tenant = rec.tenant_id,
                    category = rec.category,
                    remaining,
                    status,
                    latency_ms,
                    tags = ?rec.tags,
                    "request completed"
                );
                if rec.usage_logging {
                    tracing::info!(
                        target: "aihub::usage",
                        request_id = rec.request_id,
                        tenant = rec.tenant_id,
                        category = rec.category,
                        status,
                        latency_ms,
                        "usage"
                    );
                }
            }
            Outcome::Error(code) if code.http_status() >= 500 => {
                tracing::warn!(
                    target: "aihub::diagnostics",
                    request_id = rec.request_id,
                    tenant = rec.tenant_id,
                    category = rec.category,
                    stage = rec.stage,
                    remaining,
                    error = code.as_str(),
                    latency_ms,
                    "request failed"
                );
            }
            Outcome::Error(code) => {
                tracing::info!(
                    target: "aihub::diagnostics",
                    request_id = rec.request_id,
                    tenant = rec.tenant_id,
                    category = rec.category,
                    stage = rec.stage,
                    remaining,
                    error = code.as_str(),
                    latency_ms,
                    "request rejected"
                );
            }
        }
        Ok(())
    }
}

/// Counters, remaining-token gauge and latency histogram.
pub struct MetricsSink {
    metrics: Arc<GatewayMetrics>,
}

impl MetricsSink {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }
}

impl DiagnosticsSink for MetricsSink {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn emit(&self, rec: &DiagnosticRecord<'_>) -> Result<()> {
        self.metrics.requests.inc(&[
            ("tenant", rec.tenant_label),
            ("category", rec.category),
            ("outcome", rec.outcome.label()),
        ]);
        if let Some(remaining) = rec.remaining {
            self.metrics.rate_limit_remaining.set(
                &[("tenant", rec.tenant_label)],
                i64::try_from(remaining).unwrap_or(i64::MAX),
            );
        }
        self.metrics.request_duration.observe(
            &[("tenant", rec.tenant_label), ("category", rec.category)],
            rec.latency,
        );
        Ok(())
    }
}

pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
    metrics: Arc<GatewayMetrics>,
}

impl Diagnostics {
    /// Tracing and metrics sinks.
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            sinks: vec![
                Arc::new(TracingSink),
                Arc::new(MetricsSink::new(Arc::clone(&metrics))),
            ],
            metrics,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn record(&self, ctx: &RequestContext, outcome: Outcome) {
        let rec = DiagnosticRecord::from_context(ctx, outcome);
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&rec) {
                self.metrics.diagnostics_dropped.inc(&[("sink", sink.name())]);
                tracing::debug!(sink = sink.name(), error = %e, "diagnostic dropped");
            }
        }
    }
}
