//! Observability for streaming requests.
//!
//! The crate emits `tracing` events and spans; [`LoggingConfig`] installs a
//! subscriber for applications that do not bring their own. Stream lifecycle
//! counters go through the [`StreamMetrics`] trait.

mod logging;
mod metrics;
mod redact;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::{InMemoryStreamMetrics, NoopStreamMetrics, StreamMetrics, StreamMetricsSnapshot};
pub use redact::{redact, redact_body, MAX_REDACTED_LEN};
