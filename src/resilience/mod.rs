//! Resilience for establishing streams.
//!
//! Retries cover only the request that opens a stream. Once the first
//! fragment is delivered a failure settles the request.

mod retry;

pub use retry::{RetryConfig, RetryPolicy};
