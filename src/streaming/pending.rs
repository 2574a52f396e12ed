//! Channel-based delivery on a background task.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

use super::accumulator::AccumulatedResult;
use super::chunk::StreamChunk;
use super::dispatch::StreamDecoder;
use crate::errors::{StreamError, StreamResult};
use crate::transport::ByteStream;

/// Handle to an in-flight streaming request.
///
/// Settles exactly once. Dropping the handle cancels the request.
#[derive(Debug)]
pub struct PendingRequest {
    id: Uuid,
    cancel: CancellationToken,
    result: oneshot::Receiver<StreamResult<AccumulatedResult>>,
    guard: DropGuard,
}

impl PendingRequest {
    /// Request id used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signals cancellation. The request settles with
    /// [`StreamError::Cancelled`] unless it already settled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a token that cancels this request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the request to settle.
    pub async fn wait(self) -> StreamResult<AccumulatedResult> {
        let PendingRequest { result, guard, .. } = self;
        let outcome = result
            .await
            .unwrap_or_else(|_| Err(StreamError::internal("Decode task ended without settling")));
        guard.disarm();
        outcome
    }
}

/// Chunks of an in-flight request, in arrival order.
///
/// Ends when the request settles. Dropping it before then fails the request
/// with [`StreamError::Cancelled`] on the next delivery.
#[derive(Debug)]
pub struct TokenStream {
    receiver: mpsc::Receiver<StreamChunk>,
}

impl TokenStream {
    /// Receives the next chunk.
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.receiver.recv().await
    }
}

impl Stream for TokenStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Runs `decoder` over `body` on a new task.
///
/// Chunks are delivered through a channel of `capacity` slots; a full
/// channel stops reading from the body until the consumer catches up.
/// Cancelling `cancel` (or dropping the returned [`PendingRequest`]) stops
/// the task promptly.
pub fn spawn_decode(
    decoder: StreamDecoder,
    body: ByteStream,
    capacity: usize,
    cancel: CancellationToken,
) -> (PendingRequest, TokenStream) {
    let (chunk_tx, chunk_rx) = mpsc::channel(capacity.max(1));
    let (settle_tx, settle_rx) = oneshot::channel();
    let id = Uuid::new_v4();
    let span = tracing::debug_span!("llm_stream.request", request_id = %id);

    let task_cancel = cancel.clone();
    tokio::spawn(
        async move {
            let mut decoder = decoder;
            let outcome = decoder.run(body, &chunk_tx, &task_cancel).await;
            drop(chunk_tx);
            if settle_tx.send(outcome).is_err() {
                tracing::trace!("Request handle dropped before settlement");
            }
        }
        .instrument(span),
    );

    let pending = PendingRequest {
        id,
        guard: cancel.clone().drop_guard(),
        cancel,
        result: settle_rx,
    };
    (pending, TokenStream { receiver: chunk_rx })
}
