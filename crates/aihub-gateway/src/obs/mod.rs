//! Observability: diagnostics emission and in-process metrics.
//!
//! Metrics are stored as atomics and rendered by the `/metrics` handler;
//! diagnostics fan each finished request out to the configured sinks.

pub mod diagnostics;
pub mod metrics;

pub use diagnostics::{DiagnosticRecord, Diagnostics, DiagnosticsSink, UNRESOLVED_TENANT};
pub use metrics::GatewayMetrics;
