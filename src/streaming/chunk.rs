//! Normalized unit of streamed model output.

use serde::Serialize;
use serde_json::{Map, Value};

/// Provider metadata attached to a chunk (token counts, finish reason, model).
pub type Metadata = Map<String, Value>;

/// One incremental unit of model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamChunk {
    /// Incremental text, possibly empty.
    pub text: String,
    /// Incremental reasoning text, kept apart from the answer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    /// True when the provider marked this as the last chunk.
    pub is_final: bool,
    /// Provider metadata carried by this chunk.
    pub metadata: Metadata,
}

impl StreamChunk {
    /// Creates a content chunk.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: String::new(),
            is_final: false,
            metadata: Metadata::new(),
        }
    }

    /// Attaches reasoning text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Marks the chunk as final.
    pub fn into_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// True when the chunk carries no text, reasoning or metadata.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reasoning.is_empty() && self.metadata.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_builders() {
        let chunk = StreamChunk::text("Hel")
            .with_entry("model", json!("llama3"))
            .into_final();
        assert_eq!(chunk.text, "Hel");
        assert!(chunk.is_final);
        assert_eq!(chunk.metadata.get("model"), Some(&json!("llama3")));
    }

    #[test]
    fn test_chunk_is_empty() {
        assert!(StreamChunk::default().is_empty());
        assert!(!StreamChunk::text("x").is_empty());
        assert!(!StreamChunk::default().with_reasoning("hmm").is_empty());
        assert!(!StreamChunk::default()
            .with_entry("eval_count", json!(12))
            .is_empty());
    }
}
