//! aihub gateway library entry.
//!
//! This crate wires config, the tenant registry, auth rewriting, rate
//! limiting, backend dispatch and diagnostics into one policy pipeline behind
//! an axum router. It is consumed by the binary (`main.rs`) and by
//! integration tests.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod pipeline;
pub mod policy;
pub mod router;
pub mod transport;
