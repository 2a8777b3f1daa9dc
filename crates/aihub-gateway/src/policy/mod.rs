//! Policy layer (per-tenant rate limiting).
//!
//! Buckets are keyed by tenant id and mutated only through `RateLimiter`.

pub mod limiter;

pub use limiter::{Admission, RateLimiter};
