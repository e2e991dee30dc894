//! Dispatch Streams
//!
//! A [`DispatchStream`] is the caller's end of one streaming dispatch: a
//! finite, non-restartable sequence of [`StreamChunk`]s.
//!
//! ```text
//! strategy producer --Start/Text--> ChunkSender --+
//!        |                                        |   mpsc
//!        +--terminal chunk--> forwarding task ----+--------> DispatchStream
//!                                  ^
//!                          cancel / panic
//! ```
//!
//! The producer can only emit `Start` and `Text` through its [`ChunkSender`];
//! the terminal chunk is its return value, which the forwarding task sends
//! exactly once. Cancellation and producer panics are turned into a terminal
//! `Error` chunk by the same task, so a stream never just stops.
//!
//! Dropping the `DispatchStream` cancels the dispatch and releases the
//! endpoint streams behind it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::panic_message;
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::messages::StreamChunk;

/// Chunks buffered between producer and caller
pub const STREAM_BUFFER: usize = 64;

// ============================================================================
// Dispatch Stream
// ============================================================================

/// Caller side of a streaming dispatch
pub struct DispatchStream {
    receiver: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    finished: bool,
}

impl DispatchStream {
    /// A stream consisting of a single terminal error chunk
    #[must_use]
    pub fn from_error(error: &PoolError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Fresh channel with free capacity
        let _ = tx.try_send(StreamChunk::from_pool_error(error));
        Self {
            receiver: rx,
            cancel: CancellationToken::new(),
            finished: false,
        }
    }

    /// Next chunk, or `None` once the terminal chunk has been delivered
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = self.receiver.recv().await;
        self.observe(chunk.as_ref());
        chunk
    }

    /// Cancel the dispatch; the stream ends with a `CANCELLED` error chunk
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling this dispatch
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream into a vector
    pub async fn collect_chunks(mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    fn observe(&mut self, chunk: Option<&StreamChunk>) {
        match chunk {
            Some(chunk) if chunk.is_terminal() => self.finished = true,
            None => self.finished = true,
            Some(_) => {}
        }
    }
}

impl futures::Stream for DispatchStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.receiver.poll_recv(cx);
        if let Poll::Ready(chunk) = &polled {
            self.observe(chunk.as_ref());
        }
        polled
    }
}

impl Drop for DispatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DispatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchStream")
            .field("finished", &self.finished)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Producer Side
// ============================================================================

/// Non-terminal chunk sender handed to stream producers
#[derive(Clone)]
pub(crate) struct ChunkSender {
    sender: mpsc::Sender<StreamChunk>,
}

impl ChunkSender {
    /// Bind the stream to an endpoint
    pub(crate) async fn start(&self, endpoint: &Endpoint, request_id: &str) {
        self.send(StreamChunk::Start {
            endpoint: endpoint.identity(),
            request_id: request_id.to_string(),
        })
        .await;
    }

    /// Forward a content delta
    pub(crate) async fn text(&self, content: String) {
        self.send(StreamChunk::Text { content }).await;
    }

    // A closed receiver means the stream was dropped, which has already
    // cancelled the producer's token.
    async fn send(&self, chunk: StreamChunk) {
        let _ = self.sender.send(chunk).await;
    }
}

/// Run a stream producer on its own task.
///
/// The producer's return value is sent as the single terminal chunk.
pub(crate) fn spawn_stream<F, Fut>(cancel: CancellationToken, producer: F) -> DispatchStream
where
    F: FnOnce(ChunkSender) -> Fut,
    Fut: Future<Output = StreamChunk> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let produce = producer(ChunkSender { sender: tx.clone() });
    let token = cancel.clone();

    tokio::spawn(async move {
        let terminal = tokio::select! {
            biased;
            () = token.cancelled() => StreamChunk::from_pool_error(&PoolError::Cancelled),
            result = std::panic::AssertUnwindSafe(produce).catch_unwind() => {
                result.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(error = %message, "Stream producer panicked");
                    StreamChunk::from_pool_error(&PoolError::Internal(message))
                })
            }
        };
        let _ = tx.send(terminal).await;
    });

    DispatchStream {
        receiver: rx,
        cancel,
        finished: false,
    }
}
