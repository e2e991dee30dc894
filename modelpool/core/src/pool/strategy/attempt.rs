//! Single attempts against single endpoints.
//!
//! Every strategy funnels its transport calls through this module, so every
//! attempt is timed, bounded by the per-attempt timeout and recorded into the
//! health tracker in exactly one place. Attempts ended by cancellation reach
//! no outcome and are not recorded.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{DispatchContext, StrategyKind};
use crate::endpoint::Endpoint;
use crate::error::{PoolError, TransportError};
use crate::messages::{duration_millis, DispatchResponse, ErrorCode, StreamChunk};
use crate::pool::stream::{spawn_stream, ChunkSender, DispatchStream};
use crate::transport::{TransportEvent, TransportResult, TransportStream};

// ============================================================================
// Outcomes
// ============================================================================

/// Why an attempt failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AttemptFailure {
    pub status_code: u16,
    pub error_code: ErrorCode,
    pub message: String,
}

impl AttemptFailure {
    fn timeout(ctx: &DispatchContext) -> Self {
        Self {
            status_code: 504,
            error_code: ErrorCode::Timeout,
            message: format!("Endpoint timed out after {:?}", ctx.request.timeout),
        }
    }

    fn upstream(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_code: ErrorCode::UpstreamError,
            message: message.into(),
        }
    }

    fn from_transport(error: &TransportError) -> Self {
        Self::upstream(error.status_code(), error.to_string())
    }

    fn into_chunk(self) -> StreamChunk {
        StreamChunk::Error {
            code: self.error_code,
            message: self.message,
        }
    }
}

/// Result of one buffered attempt
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Succeeded(TransportResult),
    Failed(AttemptFailure),
    Cancelled,
}

impl AttemptOutcome {
    /// Turn the final attempt of a dispatch into the caller-facing response
    pub(crate) fn into_response(
        self,
        ctx: &DispatchContext,
        kind: StrategyKind,
        endpoint: &Endpoint,
        endpoints_attempted: usize,
    ) -> Result<DispatchResponse, PoolError> {
        let duration_ms = duration_millis(ctx.started.elapsed());
        let request_id = ctx.request.request_id.clone();

        match self {
            Self::Succeeded(result) => Ok(DispatchResponse {
                success: true,
                status_code: result.status_code,
                content: result.body,
                error_code: None,
                error_message: None,
                endpoint: Some(endpoint.identity()),
                token_usage: result.token_usage,
                duration_ms,
                strategy: kind,
                endpoints_attempted,
                request_id,
            }),
            Self::Failed(failure) => Ok(DispatchResponse {
                success: false,
                status_code: failure.status_code,
                content: None,
                error_code: Some(failure.error_code),
                error_message: Some(failure.message),
                endpoint: Some(endpoint.identity()),
                token_usage: None,
                duration_ms,
                strategy: kind,
                endpoints_attempted,
                request_id,
            }),
            Self::Cancelled => Err(PoolError::Cancelled),
        }
    }
}

// ============================================================================
// Buffered Attempts
// ============================================================================

/// Call one endpoint once and record the outcome
pub(crate) async fn attempt_once(
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    cancel: CancellationToken,
) -> AttemptOutcome {
    let started = Instant::now();
    let call = tokio::time::timeout(
        ctx.request.timeout,
        ctx.transport.send(endpoint, &ctx.request, cancel.clone()),
    );

    // The call is polled first so a transport that honours the token gets to
    // observe the cancellation and release its resources.
    let result = tokio::select! {
        biased;
        result = call => result,
        () = cancel.cancelled() => return AttemptOutcome::Cancelled,
    };
    let latency_ms = duration_millis(started.elapsed());

    let outcome = match result {
        Err(_elapsed) => AttemptOutcome::Failed(AttemptFailure::timeout(ctx)),
        Ok(Err(TransportError::Cancelled)) if cancel.is_cancelled() => {
            return AttemptOutcome::Cancelled;
        }
        Ok(Err(error)) => AttemptOutcome::Failed(AttemptFailure::from_transport(&error)),
        Ok(Ok(result)) if result.is_success => AttemptOutcome::Succeeded(result),
        Ok(Ok(result)) => {
            let message = result
                .error_message
                .unwrap_or_else(|| format!("Endpoint returned {}", result.status_code));
            AttemptOutcome::Failed(AttemptFailure::upstream(result.status_code, message))
        }
    };

    match &outcome {
        AttemptOutcome::Succeeded(result) => {
            ctx.tracker.record_success(&endpoint.endpoint_id, latency_ms);
            tracing::debug!(
                endpoint = %endpoint.endpoint_id,
                request_id = %ctx.request.request_id,
                status_code = result.status_code,
                latency_ms,
                "Attempt succeeded"
            );
        }
        AttemptOutcome::Failed(failure) => {
            ctx.tracker.record_failure(&endpoint.endpoint_id);
            tracing::debug!(
                endpoint = %endpoint.endpoint_id,
                request_id = %ctx.request.request_id,
                status_code = failure.status_code,
                error = %failure.message,
                latency_ms,
                "Attempt failed"
            );
        }
        AttemptOutcome::Cancelled => {}
    }

    outcome
}

// ============================================================================
// Streaming Attempts
// ============================================================================

/// A stream that produced its first event in time
pub(crate) struct OpenedStream {
    events: TransportStream,
    first: TransportEvent,
    started: Instant,
}

pub(crate) enum StreamOpen {
    Opened(OpenedStream),
    Failed(AttemptFailure),
    Cancelled,
}

/// Open a stream and wait for its first event.
///
/// Opening plus the first event share the per-attempt timeout. A stream that
/// fails or closes before its first event counts as a failed attempt.
pub(crate) async fn open_stream(
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    cancel: &CancellationToken,
) -> StreamOpen {
    let started = Instant::now();
    let opening = async {
        let mut events = ctx
            .transport
            .send_stream(endpoint, &ctx.request, cancel.clone())
            .await?;
        let first = events.recv().await;
        Ok::<_, TransportError>((events, first))
    };

    let result = tokio::select! {
        biased;
        result = tokio::time::timeout(ctx.request.timeout, opening) => result,
        () = cancel.cancelled() => return StreamOpen::Cancelled,
    };

    let failure = match result {
        Err(_elapsed) => {
            // Stop the producer behind the abandoned stream
            cancel.cancel();
            AttemptFailure::timeout(ctx)
        }
        Ok(Err(TransportError::Cancelled)) if cancel.is_cancelled() => {
            return StreamOpen::Cancelled;
        }
        Ok(Err(error)) => AttemptFailure::from_transport(&error),
        Ok(Ok((_, None))) => AttemptFailure::upstream(502, "Stream closed before first event"),
        Ok(Ok((_, Some(TransportEvent::Error(message))))) => AttemptFailure::upstream(502, message),
        Ok(Ok((events, Some(first)))) => {
            return StreamOpen::Opened(OpenedStream {
                events,
                first,
                started,
            });
        }
    };

    ctx.tracker.record_failure(&endpoint.endpoint_id);
    tracing::debug!(
        endpoint = %endpoint.endpoint_id,
        request_id = %ctx.request.request_id,
        error = %failure.message,
        "Stream attempt failed before first event"
    );
    StreamOpen::Failed(failure)
}

/// Forward an opened stream to the caller and return its terminal chunk.
///
/// Cancellation is checked at every chunk boundary. The per-attempt timeout
/// bounds the idle time between events. The outcome is recorded when the
/// stream ends with `Done`, an error, a stall or a truncation.
pub(crate) async fn pump(
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    cancel: &CancellationToken,
    opened: OpenedStream,
    chunks: &ChunkSender,
) -> StreamChunk {
    let OpenedStream {
        mut events,
        first,
        started,
    } = opened;

    chunks.start(endpoint, &ctx.request.request_id).await;

    let mut next = Some(first);
    loop {
        let event = match next.take() {
            Some(event) => Some(event),
            None => tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamChunk::from_pool_error(&PoolError::Cancelled),
                event = tokio::time::timeout(ctx.request.timeout, events.recv()) => match event {
                    Ok(event) => event,
                    Err(_elapsed) => return stalled(ctx, endpoint, cancel),
                },
            },
        };

        match event {
            Some(TransportEvent::Text(content)) => {
                if cancel.is_cancelled() {
                    return StreamChunk::from_pool_error(&PoolError::Cancelled);
                }
                chunks.text(content).await;
            }
            Some(TransportEvent::Done {
                finish_reason,
                usage,
            }) => {
                let latency_ms = duration_millis(started.elapsed());
                ctx.tracker.record_success(&endpoint.endpoint_id, latency_ms);
                tracing::debug!(
                    endpoint = %endpoint.endpoint_id,
                    request_id = %ctx.request.request_id,
                    latency_ms,
                    "Stream completed"
                );
                return StreamChunk::Done {
                    finish_reason,
                    usage,
                };
            }
            Some(TransportEvent::Error(message)) => {
                ctx.tracker.record_failure(&endpoint.endpoint_id);
                tracing::warn!(
                    endpoint = %endpoint.endpoint_id,
                    request_id = %ctx.request.request_id,
                    error = %message,
                    "Stream failed mid-flight"
                );
                return AttemptFailure::upstream(502, message).into_chunk();
            }
            None => {
                if cancel.is_cancelled() {
                    return StreamChunk::from_pool_error(&PoolError::Cancelled);
                }
                ctx.tracker.record_failure(&endpoint.endpoint_id);
                tracing::warn!(
                    endpoint = %endpoint.endpoint_id,
                    request_id = %ctx.request.request_id,
                    "Stream ended without completion"
                );
                return AttemptFailure::upstream(502, "Stream ended unexpectedly").into_chunk();
            }
        }
    }
}

/// A bound stream went quiet for a whole timeout period
fn stalled(ctx: &DispatchContext, endpoint: &Endpoint, cancel: &CancellationToken) -> StreamChunk {
    // Stop the producer behind the abandoned stream
    cancel.cancel();
    ctx.tracker.record_failure(&endpoint.endpoint_id);
    tracing::warn!(
        endpoint = %endpoint.endpoint_id,
        request_id = %ctx.request.request_id,
        idle = ?ctx.request.timeout,
        "Stream stalled"
    );
    AttemptFailure::timeout(ctx).into_chunk()
}

/// Stream from the first endpoint that opens.
///
/// With `failover`, an endpoint whose stream fails before its first event is
/// skipped for the next one. Once `Start` is sent the stream is bound; later
/// failures end it with an `Error` chunk.
pub(crate) fn stream_endpoints(
    ctx: DispatchContext,
    endpoints: Vec<Endpoint>,
    failover: bool,
) -> DispatchStream {
    let cancel = ctx.cancel.clone();
    spawn_stream(cancel, move |chunks| async move {
        let mut last_failure = None;

        for endpoint in &endpoints {
            // A timed-out attempt cancels only its own token
            let attempt = ctx.cancel.child_token();
            match open_stream(&ctx, endpoint, &attempt).await {
                StreamOpen::Opened(opened) => {
                    return pump(&ctx, endpoint, &attempt, opened, &chunks).await;
                }
                StreamOpen::Failed(failure) => {
                    last_failure = Some(failure);
                    if !failover {
                        break;
                    }
                }
                StreamOpen::Cancelled => {
                    return StreamChunk::from_pool_error(&PoolError::Cancelled);
                }
            }
        }

        match last_failure {
            Some(failure) => failure.into_chunk(),
            None => StreamChunk::from_pool_error(&PoolError::Internal(
                "no endpoint selected for stream".into(),
            )),
        }
    })
}
