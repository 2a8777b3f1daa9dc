//! Top-level facade crate for aihub.
//!
//! Re-exports core types and the gateway library so users can depend on a single crate.

pub mod core {
    pub use aihub_core::*;
}

pub mod gateway {
    pub use aihub_gateway::*;
}
