//! Tenant and request context types shared across layers.
//!
//! The registry hands out immutable `Arc<Tenant>` snapshots; the pipeline owns
//! one `RequestContext` per in-flight request.

pub mod registry;
pub mod request;
pub mod tenant;

pub use registry::{RegistrySnapshot, TenantRegistry};
pub use request::{Outcome, RequestContext, Stage};
pub use tenant::Tenant;
