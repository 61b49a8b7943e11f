//! QuotaGuard - HTTP Rate Limiting Middleware
//!
//! This crate implements fixed-window rate limiting for HTTP services built on
//! tower. Requests are counted per client identity, either in process memory
//! or in Redis so that several server instances share one set of counters.
//! Admitted responses carry the client's remaining quota in headers; clients
//! over quota get a 429 with `Retry-After`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;

pub use middleware::{handle_error, RateLimitLayer, RateLimitService};
pub use ratelimit::{RateLimitPolicy, RateLimiter};
