//! Incremental streaming decoder.
//!
//! Bytes from a [`ByteStream`](crate::transport::ByteStream) flow through four
//! stages:
//!
//! 1. [`LineStream`] reads the body through a [`LineSplitter`], which buffers
//!    fragments and isolates framed payload lines (or whole binary
//!    event-stream messages).
//! 2. [`FrameDecoder`] parses each payload and asks an [`EventMapper`] what it
//!    means: content, terminal signal or in-band error.
//! 3. [`StreamAccumulator`] merges chunks into an [`AccumulatedResult`].
//! 4. [`StreamDecoder`] drives the `Idle → Streaming → Completed | Failed`
//!    state machine, awaiting a [`TokenHandler`] per chunk and settling once.
//!
//! [`spawn_decode`] runs the same pipeline on a task and hands the caller a
//! bounded [`TokenStream`] plus a [`PendingRequest`].

mod accumulator;
mod chunk;
mod dispatch;
mod eventstream;
mod lines;
mod mapper;
mod pending;
mod providers;

pub use accumulator::{AccumulatedResult, Completion, StreamAccumulator};
pub use chunk::{Metadata, StreamChunk};
pub use dispatch::{
    decode_stream, AsyncFnHandler, DispatchState, FnHandler, NoopHandler, StreamDecoder,
    TokenHandler,
};
pub use lines::{Framing, LineSplitter, LineStream, TrailingLinePolicy};
pub use mapper::{EventMapper, FrameDecoder, MappedEvent, TextMapper};
pub use pending::{spawn_decode, PendingRequest, TokenStream};
pub use providers::{
    BedrockConverseMapper, OllamaMapper, OpenAiCompatibleMapper, ProviderKind, TongyiMapper,
    WorkersAiMapper,
};
