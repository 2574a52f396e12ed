//! Mapping framed payloads to domain events.

use serde_json::Value;
use std::sync::Arc;

use super::chunk::{Metadata, StreamChunk};
use crate::errors::{value_to_code, StreamError, StreamResult};

/// Meaning of one framed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedEvent {
    /// Incremental content.
    Content(StreamChunk),
    /// No further chunks will arrive. May carry a last piece of text or the
    /// final usage metadata.
    Terminal(Option<StreamChunk>),
    /// Well-formed frame with nothing to deliver.
    Skip,
}

/// Interprets one provider's JSON event shape.
///
/// In-band error objects must be returned as [`StreamError::Provider`] and
/// unexpected shapes as [`StreamError::Protocol`].
pub trait EventMapper: Send + Sync + std::fmt::Debug {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Maps a parsed payload.
    fn map(&self, payload: Value) -> StreamResult<MappedEvent>;
}

/// Turns a raw payload line into a [`MappedEvent`].
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    mapper: Arc<dyn EventMapper>,
    done_sentinel: Option<String>,
}

impl FrameDecoder {
    /// Creates a decoder for a mapper and optional terminal sentinel.
    pub fn new(mapper: Arc<dyn EventMapper>, done_sentinel: Option<String>) -> Self {
        Self {
            mapper,
            done_sentinel,
        }
    }

    /// Returns the mapper name.
    pub fn mapper_name(&self) -> &'static str {
        self.mapper.name()
    }

    /// Decodes one payload line.
    pub fn decode(&self, line: &str) -> StreamResult<MappedEvent> {
        if self.done_sentinel.as_deref() == Some(line) {
            return Ok(MappedEvent::Terminal(None));
        }

        let payload: Value = serde_json::from_str(line).map_err(|e| {
            StreamError::protocol(format!("Failed to parse stream event: {}", e), Some(line))
        })?;

        self.mapper.map(payload)
    }
}

/// Generic mapper for `{"text": "...", "done": bool, "error": ...}` events.
///
/// Every other top-level field is passed through as metadata.
#[derive(Debug, Clone, Default)]
pub struct TextMapper;

impl EventMapper for TextMapper {
    fn name(&self) -> &'static str {
        "text"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(mut obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(error) = obj.remove("error") {
            if !error.is_null() {
                return Err(provider_error(&error));
            }
        }

        let text = match obj.remove("text") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text,
            Some(other) => {
                return Err(StreamError::protocol(
                    format!("Expected `text` to be a string, got {}", json_type(&other)),
                    None,
                ))
            }
        };

        let done = matches!(obj.remove("done"), Some(Value::Bool(true)));
        let chunk = StreamChunk::text(text).with_metadata(obj);

        if done {
            return Ok(MappedEvent::Terminal(Some(chunk.into_final())));
        }
        if chunk.is_empty() {
            return Ok(MappedEvent::Skip);
        }
        Ok(MappedEvent::Content(chunk))
    }
}

/// Builds a provider error from an `error` value that is either a message
/// string or an object with `message` and `code`/`type`.
pub(crate) fn provider_error(error: &Value) -> StreamError {
    match error {
        Value::String(message) => StreamError::provider(message.clone(), None),
        Value::Object(obj) => {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            let code = obj
                .get("code")
                .or_else(|| obj.get("type"))
                .and_then(value_to_code);
            StreamError::provider(message, code)
        }
        other => StreamError::provider(other.to_string(), None),
    }
}

/// Copies the listed keys from `source` into a new metadata map, skipping nulls.
pub(crate) fn pick(source: &Metadata, keys: &[&str]) -> Metadata {
    keys.iter()
        .filter_map(|key| match source.get(*key) {
            Some(Value::Null) | None => None,
            Some(value) => Some((key.to_string(), value.clone())),
        })
        .collect()
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(Arc::new(TextMapper), Some("[DONE]".to_string()))
    }

    #[test]
    fn test_sentinel_is_terminal() {
        assert_eq!(decoder().decode("[DONE]").unwrap(), MappedEvent::Terminal(None));
    }

    #[test]
    fn test_text_event_is_content() {
        let event = decoder().decode(r#"{"text":"Hel"}"#).unwrap();
        assert_eq!(event, MappedEvent::Content(StreamChunk::text("Hel")));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        let err = decoder().decode(r#"{"text":"Hel"#).unwrap_err();
        match err {
            StreamError::Protocol { line, .. } => {
                assert_eq!(line.as_deref(), Some(r#"{"text":"Hel"#));
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_is_protocol_error() {
        let err = decoder().decode("[1, 2]").unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[test]
    fn test_non_string_text_is_protocol_error() {
        let err = decoder().decode(r#"{"text": 5}"#).unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[test]
    fn test_error_string_is_provider_error() {
        let err = decoder().decode(r#"{"error":"model overloaded"}"#).unwrap_err();
        match err {
            StreamError::Provider { message, code } => {
                assert_eq!(message, "model overloaded");
                assert_eq!(code, None);
            }
            other => panic!("Expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_object_keeps_code() {
        let err = provider_error(&json!({"message": "quota", "code": 429}));
        match err {
            StreamError::Provider { message, code } => {
                assert_eq!(message, "quota");
                assert_eq!(code.as_deref(), Some("429"));
            }
            other => panic!("Expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn test_done_flag_is_terminal_with_metadata() {
        let event = decoder()
            .decode(r#"{"text":"!","done":true,"usage":{"output_tokens":3}}"#)
            .unwrap();
        match event {
            MappedEvent::Terminal(Some(chunk)) => {
                assert_eq!(chunk.text, "!");
                assert!(chunk.is_final);
                assert_eq!(chunk.metadata["usage"], json!({"output_tokens": 3}));
            }
            other => panic!("Expected terminal, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_event_is_skipped() {
        assert_eq!(decoder().decode("{}").unwrap(), MappedEvent::Skip);
    }

    #[test]
    fn test_pick_skips_nulls() {
        let source = json!({"a": 1, "b": null, "c": "x"});
        let picked = pick(source.as_object().unwrap(), &["a", "b", "d"]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked["a"], json!(1));
    }
}
