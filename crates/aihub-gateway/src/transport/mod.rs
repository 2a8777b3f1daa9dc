//! Transport layer (HTTP).
//!
//! Turns inbound HTTP requests into pipeline input and pipeline results back
//! into HTTP responses.

pub mod http;
