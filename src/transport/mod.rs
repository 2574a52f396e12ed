//! Transport layer.
//!
//! A [`StreamTransport`] opens a streaming request and hands back the raw
//! response body as a [`ByteStream`]. It is responsible for connection setup,
//! authentication headers and for failing with a typed error on a
//! non-success status before any streaming begins.

mod http;

pub use http::ReqwestTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Raw response body as an ordered sequence of byte fragments.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Transport error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Timeout while connecting or waiting for headers.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// Timeout duration.
        timeout: Duration,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, or the status reason.
        message: String,
        /// Raw (redacted) response body.
        body: Option<String>,
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Reading the response body failed mid-stream.
    #[error("Body read error: {message}")]
    Body {
        /// Error message.
        message: String,
    },

    /// The request was cancelled while the transport was waiting.
    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                timeout: Duration::ZERO,
            }
        } else if err.is_connect() {
            TransportError::Connection {
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            TransportError::Body {
                message: err.to_string(),
            }
        } else {
            TransportError::Connection {
                message: err.to_string(),
            }
        }
    }
}

/// A streaming request to a provider endpoint.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Path relative to the configured base URL.
    pub path: String,
    /// JSON request payload.
    pub body: serde_json::Value,
    /// Extra headers for this request only.
    pub headers: HashMap<String, String>,
}

impl StreamRequest {
    /// Creates a new request for a path with a JSON payload.
    pub fn new(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            body,
            headers: HashMap::new(),
        }
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// An established streaming response.
pub struct StreamingResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Body fragments.
    pub stream: ByteStream,
}

impl StreamingResponse {
    /// Creates a 200 response around a byte stream.
    pub fn ok(stream: ByteStream) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            stream,
        }
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns the media type of the body without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or("").trim())
    }

    /// Returns true when the server answered with a plain JSON document
    /// instead of an event stream.
    pub fn is_plain_json(&self) -> bool {
        self.content_type() == Some("application/json")
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Opens streaming requests.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Sends the request and returns once response headers arrived.
    ///
    /// Implementations must fail with [`TransportError::Status`] for a
    /// non-success status, and with [`TransportError::Cancelled`] when
    /// `cancel` fires before headers arrive.
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamingResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_content_type_strips_parameters() {
        let response = StreamingResponse::ok(Box::pin(stream::empty()))
            .with_header("Content-Type", "application/json; charset=utf-8");
        assert_eq!(response.content_type(), Some("application/json"));
        assert!(response.is_plain_json());
    }

    #[test]
    fn test_event_stream_is_not_plain_json() {
        let response = StreamingResponse::ok(Box::pin(stream::empty()))
            .with_header("content-type", "text/event-stream");
        assert!(!response.is_plain_json());
    }

    #[test]
    fn test_stream_request_headers() {
        let request = StreamRequest::new("/api/chat", serde_json::json!({"stream": true}))
            .with_header("x-trace", "abc");
        assert_eq!(request.headers.get("x-trace"), Some(&"abc".to_string()));
        assert_eq!(request.path, "/api/chat");
    }
}
