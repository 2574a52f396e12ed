//! Dispatch state machine.
//!
//! A [`StreamDecoder`] consumes one response body, awaits the caller's
//! [`TokenHandler`] for every delivered chunk and settles exactly once with
//! either an [`AccumulatedResult`] or a [`StreamError`].

use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::accumulator::{AccumulatedResult, Completion, StreamAccumulator};
use super::chunk::StreamChunk;
use super::lines::LineStream;
use super::mapper::{EventMapper, FrameDecoder, MappedEvent};
use crate::config::FramingConfig;
use crate::errors::{StreamError, StreamResult};
use crate::observability::{NoopStreamMetrics, StreamMetrics};
use crate::transport::ByteStream;

/// Lifecycle of a single streaming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No fragment received yet.
    Idle,
    /// At least one fragment received, not settled.
    Streaming,
    /// Settled successfully.
    Completed,
    /// Settled with an error.
    Failed,
}

impl DispatchState {
    /// Returns true once the request has settled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }

    fn can_transition_to(self, next: DispatchState) -> bool {
        matches!(
            (self, next),
            (DispatchState::Idle, DispatchState::Streaming)
                | (DispatchState::Idle, DispatchState::Completed)
                | (DispatchState::Idle, DispatchState::Failed)
                | (DispatchState::Streaming, DispatchState::Completed)
                | (DispatchState::Streaming, DispatchState::Failed)
        )
    }
}

/// Receives chunks as they are decoded.
///
/// The decoder awaits each call before processing the next frame, so a slow
/// handler applies backpressure to the connection. Returning an error fails
/// the stream with that error.
#[async_trait]
pub trait TokenHandler: Send + Sync {
    /// Called once per delivered chunk, in arrival order.
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()>;
}

/// Handler that ignores every chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl TokenHandler for NoopHandler {
    async fn on_token(&self, _chunk: &StreamChunk) -> StreamResult<()> {
        Ok(())
    }
}

/// Wraps a synchronous callback.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&StreamChunk) + Send + Sync,
{
    /// Creates a handler from a callback.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TokenHandler for FnHandler<F>
where
    F: Fn(&StreamChunk) + Send + Sync,
{
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()> {
        (self.0)(chunk);
        Ok(())
    }
}

/// Wraps an async callback taking an owned chunk.
pub struct AsyncFnHandler<F>(F);

impl<F, Fut> AsyncFnHandler<F>
where
    F: Fn(StreamChunk) -> Fut + Send + Sync,
    Fut: Future<Output = StreamResult<()>> + Send,
{
    /// Creates a handler from an async callback.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> TokenHandler for AsyncFnHandler<F>
where
    F: Fn(StreamChunk) -> Fut + Send + Sync,
    Fut: Future<Output = StreamResult<()>> + Send,
{
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()> {
        (self.0)(chunk.clone()).await
    }
}

/// Forwards chunks into a bounded channel. A closed receiver counts as
/// cancellation.
#[async_trait]
impl TokenHandler for mpsc::Sender<StreamChunk> {
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()> {
        self.send(chunk.clone())
            .await
            .map_err(|_| StreamError::Cancelled)
    }
}

#[async_trait]
impl<H: TokenHandler + ?Sized> TokenHandler for Arc<H> {
    async fn on_token(&self, chunk: &StreamChunk) -> StreamResult<()> {
        (**self).on_token(chunk).await
    }
}

/// Decodes one response body and dispatches its chunks.
pub struct StreamDecoder {
    framing: FramingConfig,
    frames: FrameDecoder,
    accumulator: StreamAccumulator,
    state: DispatchState,
    metrics: Arc<dyn StreamMetrics>,
}

impl StreamDecoder {
    /// Creates a decoder for the given framing rules and event mapper.
    pub fn new(framing: &FramingConfig, mapper: Arc<dyn EventMapper>) -> Self {
        Self {
            framing: framing.clone(),
            frames: FrameDecoder::new(mapper, framing.done_sentinel.clone()),
            accumulator: StreamAccumulator::new(),
            state: DispatchState::Idle,
            metrics: Arc::new(NoopStreamMetrics),
        }
    }

    /// Reports lifecycle events to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn StreamMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Consumes `body` until a terminal signal, end of body, an error or
    /// cancellation, and settles.
    ///
    /// The first terminal condition wins: once a terminal signal is decoded
    /// the rest of the body is not read, so later error frames cannot change
    /// the outcome. A decoder runs once; calling `run` again fails with
    /// [`StreamError::Internal`].
    pub async fn run<H>(
        &mut self,
        body: ByteStream,
        handler: &H,
        cancel: &CancellationToken,
    ) -> StreamResult<AccumulatedResult>
    where
        H: TokenHandler + ?Sized,
    {
        if self.state != DispatchState::Idle {
            return Err(StreamError::internal("Stream decoder has already run"));
        }

        let provider = self.frames.mapper_name();
        let span = tracing::info_span!("llm_stream.decode", provider = provider);
        let started = Instant::now();

        let lines = LineStream::new(body, &self.framing);
        let outcome = self
            .pump(lines, handler, cancel, started)
            .instrument(span)
            .await;

        match outcome {
            Ok(completion) => {
                self.transition(DispatchState::Completed);
                let result = std::mem::take(&mut self.accumulator).finish(completion);
                self.metrics
                    .record_completed(provider, result.chunk_count, started.elapsed());
                tracing::debug!(
                    provider,
                    chunks = result.chunk_count,
                    chars = result.full_text.len(),
                    completion = ?completion,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stream completed"
                );
                Ok(result)
            }
            Err(err) => {
                self.transition(DispatchState::Failed);
                self.metrics.record_failed(provider, err.kind());
                if matches!(err, StreamError::Cancelled) {
                    tracing::debug!(
                        provider,
                        chunks = self.accumulator.chunk_count(),
                        "Stream cancelled"
                    );
                } else {
                    tracing::warn!(
                        provider,
                        error = %err,
                        kind = %err.kind(),
                        chunks = self.accumulator.chunk_count(),
                        "Stream failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Drives `lines` to a terminal condition. Returning drops the body.
    async fn pump<H>(
        &mut self,
        mut lines: LineStream,
        handler: &H,
        cancel: &CancellationToken,
        started: Instant,
    ) -> StreamResult<Completion>
    where
        H: TokenHandler + ?Sized,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                next = lines.next() => next,
            };

            if self.state == DispatchState::Idle && lines.fragments_received() > 0 {
                self.transition(DispatchState::Streaming);
                self.metrics.record_started(self.frames.mapper_name());
            }

            match next {
                Some(line) => {
                    if self.handle_line(&line?, handler, cancel, started).await? {
                        return Ok(Completion::Terminal);
                    }
                }
                None => return Ok(Completion::EndOfStream),
            }
        }
    }

    /// Returns true when `line` was a terminal signal.
    async fn handle_line<H>(
        &mut self,
        line: &str,
        handler: &H,
        cancel: &CancellationToken,
        started: Instant,
    ) -> StreamResult<bool>
    where
        H: TokenHandler + ?Sized,
    {
        match self.frames.decode(line)? {
            MappedEvent::Content(chunk) => {
                self.deliver(chunk, handler, cancel, started).await?;
                Ok(false)
            }
            MappedEvent::Terminal(chunk) => {
                tracing::trace!("Terminal signal received");
                if let Some(chunk) = chunk {
                    self.deliver(chunk.into_final(), handler, cancel, started)
                        .await?;
                }
                Ok(true)
            }
            MappedEvent::Skip => Ok(false),
        }
    }

    async fn deliver<H>(
        &mut self,
        chunk: StreamChunk,
        handler: &H,
        cancel: &CancellationToken,
        started: Instant,
    ) -> StreamResult<()>
    where
        H: TokenHandler + ?Sized,
    {
        if chunk.is_empty() {
            return Ok(());
        }

        let provider = self.frames.mapper_name();
        self.accumulator.push(&chunk);
        if self.accumulator.chunk_count() == 1 {
            self.metrics.record_first_chunk(provider, started.elapsed());
        }
        self.metrics.record_chunk(provider, chunk.text.chars().count());
        tracing::trace!(
            chars = chunk.text.len(),
            is_final = chunk.is_final,
            "Delivering chunk"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            result = handler.on_token(&chunk) => result,
        }
    }

    fn transition(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("provider", &self.frames.mapper_name())
            .field("state", &self.state)
            .field("framing", &self.framing.framing)
            .field("chunks", &self.accumulator.chunk_count())
            .finish()
    }
}

/// Decodes `body` with a fresh [`StreamDecoder`].
pub async fn decode_stream<H>(
    body: ByteStream,
    framing: &FramingConfig,
    mapper: Arc<dyn EventMapper>,
    handler: &H,
    cancel: &CancellationToken,
) -> StreamResult<AccumulatedResult>
where
    H: TokenHandler + ?Sized,
{
    StreamDecoder::new(framing, mapper)
        .run(body, handler, cancel)
        .await
}
