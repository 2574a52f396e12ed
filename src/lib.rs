//! Streaming response decoder for LLM provider APIs
//!
//! Turns a chunked HTTP response body from a language-model provider into an
//! ordered sequence of text chunks delivered to a handler, and settles once
//! with the accumulated result or a typed error.
//!
//! # Features
//!
//! - **Fragment-safe framing**: `data:`-prefixed SSE, NDJSON, AWS
//!   event-stream or whole-body payloads, split correctly however the
//!   network fragments the bytes
//! - **Provider profiles**: generic `{"text": ..}` events, Ollama, Tongyi,
//!   OpenAI-compatible services, Workers AI and Bedrock Converse
//! - **Settle-once dispatch**: `Idle → Streaming → Completed | Failed`, first
//!   terminal condition wins, cooperative cancellation
//! - **Typed errors**: transport, protocol, provider and cancellation
//!   failures are distinguishable
//! - **Channel delivery**: consume chunks as a `Stream` while a background
//!   task drives the connection
//! - **Observability**: `tracing` spans, stream metrics, credential redaction
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use integrations_llm_stream::{ChatMessage, StreamConfig, StreamingClient};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StreamingClient::new(StreamConfig::from_env()?)?;
//!     let request = client.chat_request("llama3", &[ChatMessage::user("Hi!")])?;
//!
//!     let (pending, mut tokens) = client.spawn_stream(request).await?;
//!     while let Some(chunk) = tokens.next().await {
//!         print!("{}", chunk.text);
//!     }
//!
//!     let result = pending.wait().await?;
//!     println!("\n{} chunks", result.chunk_count);
//!     Ok(())
//! }
//! ```
//!
//! # Decoding a body directly
//!
//! ```rust
//! use integrations_llm_stream::{decode_stream, FramingConfig, NoopHandler, TextMapper, TransportError};
//! use bytes::Bytes;
//! use futures::{stream, StreamExt};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let body = stream::iter(vec![
//!     Ok::<_, TransportError>(Bytes::from_static(b"data: {\"text\":\"Hel\"}\n")),
//!     Ok(Bytes::from_static(b"data: {\"text\":\"lo\"}\ndata: [DONE]\n")),
//! ])
//! .boxed();
//!
//! let result = decode_stream(
//!     body,
//!     &FramingConfig::sse(),
//!     Arc::new(TextMapper),
//!     &NoopHandler,
//!     &CancellationToken::new(),
//! )
//! .await?;
//! assert_eq!(result.full_text, "Hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod mocks;
pub mod observability;
pub mod resilience;
pub mod streaming;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use cache::{CacheKey, ClientCache};
pub use client::{StreamingClient, StreamingClientBuilder};
pub use config::{FramingConfig, StreamConfig, StreamConfigBuilder};
pub use errors::{ErrorKind, StreamError, StreamResult};
pub use streaming::{
    decode_stream, spawn_decode, AccumulatedResult, AsyncFnHandler, BedrockConverseMapper,
    Completion, DispatchState,
    EventMapper, FnHandler, Framing, LineSplitter, LineStream, MappedEvent, Metadata, NoopHandler,
    OllamaMapper, OpenAiCompatibleMapper, PendingRequest, ProviderKind, StreamChunk,
    StreamDecoder, TextMapper, TokenHandler, TokenStream, TongyiMapper, TrailingLinePolicy,
    WorkersAiMapper,
};
pub use transport::{ByteStream, StreamRequest, StreamTransport, TransportError};
pub use types::{ChatMessage, Role, RoleMapper};
