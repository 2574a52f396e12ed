//! Shared helpers for integration tests.

#![allow(dead_code)]

use integrations_llm_stream::mocks::MockTransport;
use integrations_llm_stream::resilience::RetryConfig;
use integrations_llm_stream::{ProviderKind, StreamConfig, StreamingClient};
use std::sync::Arc;
use std::time::Duration;

/// Body from the two-fragment example: `Hel` + `lo`, then `[DONE]`.
pub const HELLO_FRAGMENTS: [&str; 2] = [
    "data: {\"text\":\"Hel\"}\n",
    "data: {\"text\":\"lo\"}\ndata: [DONE]\n",
];

pub fn config(provider: ProviderKind) -> StreamConfig {
    StreamConfig::builder()
        .base_url("http://127.0.0.1:9/v1")
        .api_key("sk-test-key-123456")
        .provider(provider)
        .channel_capacity(2)
        .build()
        .unwrap()
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
}

pub fn mock_client(provider: ProviderKind) -> (StreamingClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let client = StreamingClient::builder(config(provider))
        .transport(transport.clone())
        .retry(fast_retry())
        .build()
        .unwrap();
    (client, transport)
}

/// Splits `raw` into fragments of `size` bytes, ignoring UTF-8 boundaries.
pub fn chunked(raw: &str, size: usize) -> Vec<bytes::Bytes> {
    raw.as_bytes()
        .chunks(size.max(1))
        .map(bytes::Bytes::copy_from_slice)
        .collect()
}
