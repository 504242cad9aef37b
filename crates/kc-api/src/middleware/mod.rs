//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`metrics`]: in-process request and workflow counters.
//! - [`rate_limit`]: fixed-window rate limiting per caller.

pub mod metrics;
pub mod rate_limit;
