//! aihub core: transport-agnostic routing primitives and error types.
//!
//! This crate defines the backend categories, the ordered route table and the
//! client-facing error surface shared by the gateway and its tests. It carries
//! no runtime or HTTP dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `GatewayError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod route;

/// Shared result type.
pub use error::{ErrorBody, ErrorCode, GatewayError, Result};
pub use route::{BackendCategory, RouteRule, RouteTable, COGNITIVE_SERVICES_AUDIENCE};
