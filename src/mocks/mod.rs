//! Mock implementations for testing.
//!
//! [`MockTransport`] replays scripted responses fragment by fragment and
//! records the requests it receives. [`RecordingHandler`] keeps every chunk
//! it is handed.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamResult;
use crate::streaming::{StreamChunk, TokenHandler};
use crate::transport::{
    ByteStream, StreamRequest, StreamTransport, StreamingResponse, TransportError,
};

/// A scripted response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A successful response delivering these fragments in order.
    Stream {
        /// Content type header.
        content_type: String,
        /// Body fragments; an `Err` ends the body with that error.
        fragments: Vec<Result<Bytes, TransportError>>,
        /// Keep the body open after the last fragment.
        hang: bool,
        /// Delay before each fragment.
        delay: Option<Duration>,
    },
    /// The transport fails before any byte is delivered.
    Fail(TransportError),
}

impl MockResponse {
    /// An event stream built from string fragments.
    pub fn sse<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            content_type: "text/event-stream".to_string(),
            fragments: fragments
                .into_iter()
                .map(|f| Ok(Bytes::from(f.into())))
                .collect(),
            hang: false,
            delay: None,
        }
    }

    /// A newline-delimited JSON stream built from string fragments.
    pub fn ndjson<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Self::sse(fragments) {
            Self::Stream {
                fragments, hang, delay, ..
            } => Self::Stream {
                content_type: "application/x-ndjson".to_string(),
                fragments,
                hang,
                delay,
            },
            other => other,
        }
    }

    /// A binary body with the given content type.
    pub fn binary<I>(content_type: impl Into<String>, fragments: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self::Stream {
            content_type: content_type.into(),
            fragments: fragments.into_iter().map(Ok).collect(),
            hang: false,
            delay: None,
        }
    }

    /// A plain JSON document body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Stream {
            content_type: "application/json".to_string(),
            fragments: vec![Ok(Bytes::from(value.to_string()))],
            hang: false,
            delay: None,
        }
    }

    /// A non-success status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Fail(TransportError::Status {
            status,
            message: message.into(),
            body: None,
            retry_after: None,
        })
    }

    /// Appends a body error after the scripted fragments.
    pub fn then_error(mut self, error: TransportError) -> Self {
        if let Self::Stream { fragments, .. } = &mut self {
            fragments.push(Err(error));
        }
        self
    }

    /// Keeps the body open after the last fragment.
    pub fn hanging(mut self) -> Self {
        if let Self::Stream { hang, .. } = &mut self {
            *hang = true;
        }
        self
    }

    /// Waits `delay` before each fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        if let Self::Stream { delay: d, .. } = &mut self {
            *d = Some(delay);
        }
        self
    }
}

/// Encodes one AWS event-stream message carrying string headers.
pub fn event_stream_message(headers: &[(&str, &str)], payload: &[u8]) -> Bytes {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    // prelude, prelude CRC and message CRC
    let total_len = (16 + header_bytes.len() + payload.len()) as u32;
    let mut message = Vec::with_capacity(total_len as usize);
    message.extend_from_slice(&total_len.to_be_bytes());
    message.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&message);
    message.extend_from_slice(&prelude_crc.to_be_bytes());
    message.extend_from_slice(&header_bytes);
    message.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&message);
    message.extend_from_slice(&message_crc.to_be_bytes());
    Bytes::from(message)
}

/// Encodes a Bedrock event of type `event_type` with a JSON payload.
pub fn bedrock_event(event_type: &str, payload: &serde_json::Value) -> Bytes {
    event_stream_message(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/json"),
        ],
        payload.to_string().as_bytes(),
    )
}

/// Transport that replays queued [`MockResponse`]s.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl MockTransport {
    /// Creates a transport with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) -> &Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamingResponse, TransportError> {
        self.requests.lock().push(request);
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let response = self
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Connection {
                message: "No mock response queued".to_string(),
            })?;

        match response {
            MockResponse::Fail(error) => Err(error),
            MockResponse::Stream {
                content_type,
                fragments,
                hang,
                delay,
            } => Ok(
                StreamingResponse::ok(scripted_body(fragments, hang, delay))
                    .with_header("content-type", content_type),
            ),
        }
    }
}

fn scripted_body(
    fragments: Vec<Result<Bytes, TransportError>>,
    hang: bool,
    delay: Option<Duration>,
) -> ByteStream {
    let body = stream::iter(fragments).then(move |fragment| async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        fragment
    });

    if hang {
        body.chain(stream::pending()).boxed()
    } else {
        body.boxed()
    }
}

/// Handler that records every chunk.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    chunks: Mutex<Vec<StreamChunk>>,
}

impl RecordingHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks received so far.
    pub fn chunks(&self) -> Vec<StreamChunk> {
        self.chunks.lock().clone()
    }

    /// Texts received so far.
    pub fn texts(&self) -> Vec<String> {
        self.chunks.lock().iter().map(|c| c.text.clone()).collect()
    }
}

#[async_trait]
impl TokenHandler for RecordingHandler {
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()> {
        self.chunks.lock().push(chunk.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_replays_in_order() {
        let transport = MockTransport::new();
        transport
            .queue(MockResponse::status(503, "busy"))
            .queue(MockResponse::sse(["data: {\"text\":\"a\"}\n"]));

        let cancel = CancellationToken::new();
        let first = transport
            .open_stream(StreamRequest::new("chat", serde_json::json!({})), &cancel)
            .await;
        assert!(matches!(first, Err(TransportError::Status { status: 503, .. })));

        let second = transport
            .open_stream(StreamRequest::new("chat", serde_json::json!({})), &cancel)
            .await
            .unwrap();
        assert_eq!(second.content_type(), Some("text/event-stream"));
        let fragments: Vec<_> = second.stream.collect().await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_is_connection_error() {
        let transport = MockTransport::new();
        let result = transport
            .open_stream(
                StreamRequest::new("chat", serde_json::json!({})),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Connection { .. })));
    }
}
