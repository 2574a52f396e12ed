//! Merging chunks into a completed result.

use serde::Serialize;

use super::chunk::{Metadata, StreamChunk};

/// How a successful stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The provider sent an explicit terminal signal.
    Terminal,
    /// The body ended without a terminal signal.
    EndOfStream,
}

/// Final outcome of a successful stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatedResult {
    /// Concatenation of every chunk's text, in arrival order.
    pub full_text: String,
    /// Concatenation of every chunk's reasoning text.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    /// Metadata of the last chunk that carried any.
    pub metadata: Metadata,
    /// Number of chunks merged.
    pub chunk_count: usize,
    /// How the stream ended.
    pub completion: Completion,
}

/// Running merge of chunks.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    full_text: String,
    reasoning: String,
    metadata: Metadata,
    chunk_count: usize,
}

impl StreamAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one chunk.
    pub fn push(&mut self, chunk: &StreamChunk) {
        self.full_text.push_str(&chunk.text);
        self.reasoning.push_str(&chunk.reasoning);
        if !chunk.metadata.is_empty() {
            self.metadata = chunk.metadata.clone();
        }
        self.chunk_count += 1;
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.full_text
    }

    /// Number of chunks merged so far.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Produces the final result.
    pub fn finish(self, completion: Completion) -> AccumulatedResult {
        AccumulatedResult {
            full_text: self.full_text,
            reasoning: self.reasoning,
            metadata: self.metadata,
            chunk_count: self.chunk_count,
            completion,
        }
    }
}
