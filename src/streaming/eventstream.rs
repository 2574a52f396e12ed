//! AWS event-stream message framing.
//!
//! Each message is a length-prefixed binary frame:
//!
//! ```text
//! total_len: u32 | headers_len: u32 | prelude_crc: u32 | headers | payload | message_crc: u32
//! ```
//!
//! Both checksums are CRC-32 (IEEE). Decoded messages are rewritten as one
//! JSON document keyed by their event or exception type, e.g.
//! `{"contentBlockDelta": {...}}`, so they flow through the same
//! [`EventMapper`](super::EventMapper) pipeline as text framings.

use bytes::{Buf, BytesMut};
use serde_json::{Map, Value};

use crate::errors::{StreamError, StreamResult};

/// Prelude, prelude CRC and message CRC.
const MIN_MESSAGE_SIZE: usize = 16;
const PRELUDE_SIZE: usize = 12;

const EVENT_TYPE: &str = ":event-type";
const EXCEPTION_TYPE: &str = ":exception-type";
const MESSAGE_TYPE: &str = ":message-type";
const ERROR_CODE: &str = ":error-code";
const ERROR_MESSAGE: &str = ":error-message";

/// Incremental decoder for event-stream frames.
#[derive(Debug)]
pub(crate) struct EventStreamDecoder {
    buffer: BytesMut,
    max_message_length: usize,
}

impl EventStreamDecoder {
    pub(crate) fn new(max_message_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_length,
        }
    }

    /// Feeds a fragment and returns one JSON payload per completed message.
    pub(crate) fn feed(&mut self, data: &[u8]) -> StreamResult<Vec<String>> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();
        while let Some(message) = self.next_message()? {
            if let Some(payload) = message.into_payload()? {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    /// Bytes of an incomplete message still waiting for the rest of it.
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops a partial message left when the body ends.
    pub(crate) fn finish(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                bytes = self.buffer.len(),
                "Discarding incomplete event-stream message at end of stream"
            );
            self.buffer.clear();
        }
    }

    fn next_message(&mut self) -> StreamResult<Option<Message>> {
        if self.buffer.len() < PRELUDE_SIZE {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;
        let prelude_crc = read_u32(&self.buffer[8..12]);

        if crc32fast::hash(&self.buffer[0..8]) != prelude_crc {
            return Err(StreamError::protocol(
                "Event-stream prelude checksum mismatch",
                None,
            ));
        }
        if total_len < MIN_MESSAGE_SIZE || headers_len > total_len - MIN_MESSAGE_SIZE {
            return Err(StreamError::protocol(
                format!(
                    "Invalid event-stream message length {} with {} header bytes",
                    total_len, headers_len
                ),
                None,
            ));
        }
        if total_len > self.max_message_length {
            return Err(StreamError::protocol(
                format!(
                    "Event-stream message exceeds maximum length of {} bytes",
                    self.max_message_length
                ),
                None,
            ));
        }

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame = self.buffer.split_to(total_len);
        let message_crc = read_u32(&frame[total_len - 4..]);
        if crc32fast::hash(&frame[..total_len - 4]) != message_crc {
            return Err(StreamError::protocol(
                "Event-stream message checksum mismatch",
                None,
            ));
        }

        let headers_end = PRELUDE_SIZE + headers_len;
        let headers = parse_headers(&frame[PRELUDE_SIZE..headers_end])?;
        let payload = frame[headers_end..total_len - 4].to_vec();
        Ok(Some(Message { headers, payload }))
    }
}

struct Message {
    /// String-valued headers; other header types are skipped.
    headers: Vec<(String, String)>,
    payload: Vec<u8>,
}

impl Message {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn into_payload(self) -> StreamResult<Option<String>> {
        let message_type = self.header(MESSAGE_TYPE).unwrap_or("event");

        let (key, body) = match message_type {
            "event" => match self.header(EVENT_TYPE) {
                Some(event) => (event.to_string(), self.json_body()?),
                None => {
                    tracing::trace!("Skipping event without an event type");
                    return Ok(None);
                }
            },
            "exception" => {
                let name = self.header(EXCEPTION_TYPE).unwrap_or("unknownException");
                (name.to_string(), self.json_body()?)
            }
            "error" => {
                let mut error = Map::new();
                if let Some(code) = self.header(ERROR_CODE) {
                    error.insert("code".into(), Value::String(code.to_string()));
                }
                let message = self.header(ERROR_MESSAGE).unwrap_or("Event-stream error");
                error.insert("message".into(), Value::String(message.to_string()));
                ("error".to_string(), Value::Object(error))
            }
            other => {
                tracing::trace!(message_type = other, "Skipping event-stream message");
                return Ok(None);
            }
        };

        let mut document = Map::new();
        document.insert(key, body);
        Ok(Some(Value::Object(document).to_string()))
    }

    fn json_body(&self) -> StreamResult<Value> {
        if self.payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(&self.payload).map_err(|e| {
            StreamError::protocol(
                format!("Invalid event-stream payload: {}", e),
                Some(&String::from_utf8_lossy(&self.payload)),
            )
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_headers(mut data: &[u8]) -> StreamResult<Vec<(String, String)>> {
    let truncated = || StreamError::protocol("Truncated event-stream header", None);

    let mut headers = Vec::new();
    while data.has_remaining() {
        let name_len = data.get_u8() as usize;
        if data.remaining() < name_len + 1 {
            return Err(truncated());
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        data.advance(name_len);

        let value_len = match data.get_u8() {
            0 | 1 => 0,
            2 => 1,
            3 => 2,
            4 => 4,
            5 | 8 => 8,
            9 => 16,
            kind @ (6 | 7) => {
                if data.remaining() < 2 {
                    return Err(truncated());
                }
                let len = data.get_u16() as usize;
                if data.remaining() < len {
                    return Err(truncated());
                }
                if kind == 7 {
                    let value = std::str::from_utf8(&data[..len]).map_err(|_| {
                        StreamError::protocol("Invalid UTF-8 in event-stream header", None)
                    })?;
                    headers.push((name, value.to_string()));
                }
                data.advance(len);
                continue;
            }
            other => {
                return Err(StreamError::protocol(
                    format!("Unknown event-stream header type {}", other),
                    None,
                ))
            }
        };

        if data.remaining() < value_len {
            return Err(truncated());
        }
        data.advance(value_len);
    }
    Ok(headers)
}
