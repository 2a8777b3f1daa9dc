//! Backend dispatch.
//!
//! `Backend` is the seam between the policy pipeline and the network; the
//! gateway ships an HTTP implementation and tests plug in fakes.

pub mod backend;

pub use backend::{Backend, BackendResponse, BackendSet, ForwardRequest, HttpBackend};
