//! Line-buffering splitter for framed response bodies.

use futures::Stream;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::eventstream::EventStreamDecoder;
use crate::config::FramingConfig;
use crate::errors::{StreamError, StreamResult};
use crate::transport::ByteStream;

/// How payloads are framed in the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Server-Sent-Events: only lines starting with `prefix` carry payloads.
    Sse {
        /// Event prefix, usually `data:`.
        prefix: String,
    },
    /// Newline-delimited JSON: every non-empty line is a payload.
    Ndjson,
    /// The whole body is one payload.
    Whole,
    /// Binary AWS event-stream messages, each yielded as a JSON document
    /// keyed by its event type.
    EventStream,
}

/// What happens to an unterminated line when the body ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingLinePolicy {
    /// Drop it without emitting.
    #[default]
    Discard,
    /// Treat it as a complete line.
    Emit,
}

/// Splits byte fragments into payload lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte UTF-8 sequences
/// split across fragments decode correctly. With [`Framing::EventStream`]
/// bytes are buffered until a whole binary message arrives instead, and
/// `max_line_length` bounds the message size.
#[derive(Debug)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already scanned without finding a newline.
    scanned: usize,
    framing: Framing,
    trailing_line: TrailingLinePolicy,
    max_line_length: usize,
    events: Option<EventStreamDecoder>,
}

impl LineSplitter {
    /// Creates a splitter for the given framing rules.
    pub fn new(config: &FramingConfig) -> Self {
        let events = (config.framing == Framing::EventStream)
            .then(|| EventStreamDecoder::new(config.max_line_length));
        Self {
            buffer: Vec::new(),
            scanned: 0,
            framing: config.framing.clone(),
            trailing_line: config.trailing_line,
            max_line_length: config.max_line_length,
            events,
        }
    }

    /// Feeds a fragment and returns every payload completed by it.
    pub fn feed(&mut self, data: &[u8]) -> StreamResult<Vec<String>> {
        if let Some(events) = self.events.as_mut() {
            return events.feed(data);
        }

        self.buffer.extend_from_slice(data);

        if self.framing == Framing::Whole {
            self.check_length(self.buffer.len())?;
            return Ok(Vec::new());
        }

        let mut payloads = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            self.check_length(end - start)?;
            if let Some(payload) = self.accept(&self.buffer[start..end])? {
                payloads.push(payload);
            }
            start = end + 1;
            search_from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        self.check_length(self.buffer.len())?;

        Ok(payloads)
    }

    /// Signals end of body and returns the trailing payload, if any.
    ///
    /// An incomplete event-stream message is always discarded.
    pub fn finish(&mut self) -> StreamResult<Option<String>> {
        if let Some(events) = self.events.as_mut() {
            events.finish();
            return Ok(None);
        }

        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;

        if rest.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        if self.framing == Framing::Whole {
            let text = decode_utf8(&rest)?;
            return Ok(Some(text.trim().to_string()));
        }

        match self.trailing_line {
            TrailingLinePolicy::Emit => self.accept(&rest),
            TrailingLinePolicy::Discard => {
                tracing::debug!(
                    bytes = rest.len(),
                    "Discarding unterminated line at end of stream"
                );
                Ok(None)
            }
        }
    }

    /// Returns the number of buffered bytes not yet forming a line.
    pub fn buffered(&self) -> usize {
        self.events
            .as_ref()
            .map_or(self.buffer.len(), EventStreamDecoder::buffered)
    }

    fn check_length(&self, len: usize) -> StreamResult<()> {
        if len > self.max_line_length {
            return Err(StreamError::protocol(
                format!(
                    "Line exceeds maximum length of {} bytes",
                    self.max_line_length
                ),
                None,
            ));
        }
        Ok(())
    }

    fn accept(&self, raw: &[u8]) -> StreamResult<Option<String>> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = decode_utf8(raw)?;

        let payload = match &self.framing {
            Framing::Sse { prefix } => match line.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.trim(),
                None => return Ok(None),
            },
            Framing::Ndjson | Framing::Whole | Framing::EventStream => line.trim(),
        };

        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(payload.to_string()))
    }
}

fn decode_utf8(raw: &[u8]) -> StreamResult<&str> {
    std::str::from_utf8(raw).map_err(|e| {
        StreamError::protocol(
            format!("Invalid UTF-8 in stream: {}", e),
            Some(&String::from_utf8_lossy(raw)),
        )
    })
}

pin_project! {
    /// Lazy sequence of payload lines read from a byte stream.
    ///
    /// Ends when the body ends; not restartable. The first error ends the
    /// sequence. Dropping it drops the body.
    pub struct LineStream {
        #[pin]
        inner: ByteStream,
        splitter: LineSplitter,
        pending: VecDeque<String>,
        fragments: usize,
        finished: bool,
    }
}

impl LineStream {
    /// Wraps a byte stream.
    pub fn new(inner: ByteStream, config: &FramingConfig) -> Self {
        Self {
            inner,
            splitter: LineSplitter::new(config),
            pending: VecDeque::new(),
            fragments: 0,
            finished: false,
        }
    }

    /// Number of body fragments read so far, including ones that have not
    /// completed a line yet.
    pub fn fragments_received(&self) -> usize {
        self.fragments
    }

    /// Bytes buffered towards the next line.
    pub fn buffered(&self) -> usize {
        self.splitter.buffered()
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("fragments", &self.fragments)
            .field("pending", &self.pending.len())
            .field("buffered", &self.splitter.buffered())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for LineStream {
    type Item = StreamResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(line) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }

            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    *this.fragments += 1;
                    tracing::trace!(bytes = bytes.len(), "Received fragment");
                    match this.splitter.feed(&bytes) {
                        Ok(lines) => this.pending.extend(lines),
                        Err(e) => {
                            *this.finished = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    match this.splitter.finish() {
                        Ok(Some(line)) => return Poll::Ready(Some(Ok(line))),
                        Ok(None) => return Poll::Ready(None),
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{stream, StreamExt};

    fn sse() -> LineSplitter {
        LineSplitter::new(&FramingConfig::sse())
    }

    #[test]
    fn test_splitter_single_line() {
        let mut splitter = sse();
        let lines = splitter.feed(b"data: {\"text\":\"Hel\"}\n").unwrap();
        assert_eq!(lines, vec![r#"{"text":"Hel"}"#]);
    }

    #[test]
    fn test_splitter_partial_line_across_fragments() {
        let mut splitter = sse();
        assert!(splitter.feed(b"data: hel").unwrap().is_empty());
        assert_eq!(splitter.buffered(), 9);
        assert_eq!(splitter.feed(b"lo\n").unwrap(), vec!["hello"]);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_splitter_ignores_other_fields() {
        let mut splitter = sse();
        let lines = splitter
            .feed(b": keep-alive\nevent: message\nid: 7\ndata: one\n\nretry: 10\ndata: two\n")
            .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_splitter_crlf() {
        let mut splitter = sse();
        let lines = splitter.feed(b"data: one\r\ndata: two\r\n").unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_splitter_prefix_without_space() {
        let mut splitter = sse();
        assert_eq!(splitter.feed(b"data:[DONE]\n").unwrap(), vec!["[DONE]"]);
    }

    #[test]
    fn test_splitter_multibyte_across_fragments() {
        let mut splitter = sse();
        let line = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let (a, b) = line.split_at(8);
        assert!(splitter.feed(a).unwrap().is_empty());
        assert_eq!(splitter.feed(b).unwrap(), vec!["héllo"]);
    }

    #[test]
    fn test_splitter_invalid_utf8_is_protocol_error() {
        let mut splitter = sse();
        let err = splitter.feed(b"data: \xff\xfe\n").unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[test]
    fn test_splitter_discards_trailing_line_by_default() {
        let mut splitter = sse();
        assert!(splitter.feed(b"data: one\ndata: tw").unwrap().len() == 1);
        assert_eq!(splitter.finish().unwrap(), None);
    }

    #[test]
    fn test_splitter_emits_trailing_line_when_configured() {
        let config = FramingConfig::sse().with_trailing_line(TrailingLinePolicy::Emit);
        let mut splitter = LineSplitter::new(&config);
        splitter.feed(b"data: tw").unwrap();
        assert_eq!(splitter.finish().unwrap(), Some("tw".to_string()));
    }

    #[test]
    fn test_splitter_ndjson() {
        let mut splitter = LineSplitter::new(&FramingConfig::ndjson());
        let lines = splitter.feed(b"{\"a\":1}\n\n{\"b\":2}\n").unwrap();
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn test_splitter_whole_body() {
        let mut splitter = LineSplitter::new(&FramingConfig::whole());
        assert!(splitter.feed(b"{\"code\":\"Bad\",\n").unwrap().is_empty());
        assert!(splitter.feed(b"\"message\":\"x\"}").unwrap().is_empty());
        assert_eq!(
            splitter.finish().unwrap(),
            Some("{\"code\":\"Bad\",\n\"message\":\"x\"}".to_string())
        );
    }

    #[test]
    fn test_splitter_line_too_long() {
        let config = FramingConfig::sse().with_max_line_length(8);
        let mut splitter = LineSplitter::new(&config);
        assert!(splitter.feed(b"data: 1234567890").is_err());
    }

    #[test]
    fn test_splitter_long_line_completed_in_one_fragment() {
        let config = FramingConfig::sse().with_max_line_length(8);
        let mut splitter = LineSplitter::new(&config);
        assert!(splitter.feed(b"data: 1234567890\n").is_err());
    }

    #[test]
    fn test_fragmentation_invariance_every_split_point() {
        let input = "data: {\"text\":\"a\"}\n: ping\ndata: {\"text\":\"é\"}\r\n\ndata: [DONE]\n";
        let bytes = input.as_bytes();

        let mut whole = sse();
        let expected = whole.feed(bytes).unwrap();

        for split in 0..=bytes.len() {
            let mut splitter = sse();
            let mut lines = splitter.feed(&bytes[..split]).unwrap();
            lines.extend(splitter.feed(&bytes[split..]).unwrap());
            assert_eq!(lines, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_splitter_event_stream_messages() {
        use crate::mocks::event_stream_message;

        let mut body = event_stream_message(
            &[(":message-type", "event"), (":event-type", "contentBlockDelta")],
            br#"{"delta":{"text":"Hi"}}"#,
        )
        .to_vec();
        body.extend(event_stream_message(
            &[(":message-type", "event"), (":event-type", "messageStop")],
            br#"{"stopReason":"end_turn"}"#,
        ));

        let mut splitter = LineSplitter::new(&FramingConfig::event_stream());
        let (a, b) = body.split_at(30);
        let mut lines = splitter.feed(a).unwrap();
        assert!(splitter.buffered() > 0);
        lines.extend(splitter.feed(b).unwrap());

        assert_eq!(
            lines,
            vec![
                r#"{"contentBlockDelta":{"delta":{"text":"Hi"}}}"#,
                r#"{"messageStop":{"stopReason":"end_turn"}}"#,
            ]
        );
        assert_eq!(splitter.finish().unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_stream_counts_fragments_without_lines() {
        let fragments: Vec<Result<Bytes, crate::transport::TransportError>> = vec![
            Ok(Bytes::from_static(b"data: par")),
            Ok(Bytes::from_static(b"tial")),
        ];
        let mut lines = LineStream::new(Box::pin(stream::iter(fragments)), &FramingConfig::sse());
        assert_eq!(lines.fragments_received(), 0);
        assert!(lines.next().await.is_none());
        assert_eq!(lines.fragments_received(), 2);
        assert_eq!(LineStream::buffered(&lines), 0);
    }

    #[tokio::test]
    async fn test_line_stream_yields_lines_in_order() {
        let fragments: Vec<Result<Bytes, crate::transport::TransportError>> = vec![
            Ok(Bytes::from_static(b"data: a\nda")),
            Ok(Bytes::from_static(b"ta: b\n")),
            Ok(Bytes::from_static(b"data: c")),
        ];
        let lines: Vec<String> = LineStream::new(Box::pin(stream::iter(fragments)), &FramingConfig::sse())
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_line_stream_surfaces_transport_error() {
        let fragments: Vec<Result<Bytes, crate::transport::TransportError>> = vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err(crate::transport::TransportError::Body {
                message: "reset".to_string(),
            }),
            Ok(Bytes::from_static(b"data: never\n")),
        ];
        let mut lines = LineStream::new(Box::pin(stream::iter(fragments)), &FramingConfig::sse());
        assert_eq!(lines.next().await.unwrap().unwrap(), "a");
        assert!(matches!(
            lines.next().await,
            Some(Err(StreamError::Transport { .. }))
        ));
        assert!(lines.next().await.is_none());
    }
}
