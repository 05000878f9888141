//! Server-side platform guards for the ingestion endpoint.

pub mod rate_limit;

pub use rate_limit::{DashMapRateLimitStore, RateLimitConfig, RateLimitStore, RateLimiter};
