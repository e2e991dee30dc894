//! Race: concurrent calls, first success wins.
//!
//! All contenders start together, each under a child of the dispatch
//! cancellation token. The first success cancels every sibling, and the
//! siblings are driven to completion before the strategy returns so their
//! transport resources are released. Siblings cut off by the winner reach no
//! outcome and are not recorded; siblings that had already failed are.
//!
//! ```text
//!              +--> attempt(A) --success--+
//! dispatch ----+--> attempt(B) ...........+--> cancel(B, C) --> drain --> A
//!              +--> attempt(C) ...........+
//! ```

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use super::attempt::{open_stream, pump, StreamOpen};
use super::{attempt_once, AttemptOutcome, DispatchContext, DispatchStrategy, StrategyKind};
use crate::error::PoolError;
use crate::messages::{DispatchResponse, StreamChunk};
use crate::pool::stream::{spawn_stream, DispatchStream};

/// Concurrent dispatch to the top candidates
#[derive(Clone, Copy, Debug, Default)]
pub struct RaceStrategy {
    max_concurrency: Option<usize>,
}

impl RaceStrategy {
    /// Race all candidates, or at most `max_concurrency` of them
    #[must_use]
    pub fn new(max_concurrency: Option<usize>) -> Self {
        Self { max_concurrency }
    }

    fn contenders(&self, available: usize) -> usize {
        self.max_concurrency
            .map_or(available, |cap| cap.clamp(1, available.max(1)))
            .min(available)
    }
}

#[async_trait]
impl DispatchStrategy for RaceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Race
    }

    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError> {
        let contenders = &ctx.candidates[..self.contenders(ctx.candidates.len())];
        let scope = ctx.cancel.child_token();

        let mut in_flight: FuturesUnordered<_> = contenders
            .iter()
            .map(|endpoint| {
                let token = scope.child_token();
                async move { (endpoint, attempt_once(ctx, endpoint, token).await) }
            })
            .collect();

        tracing::debug!(
            request_id = %ctx.request.request_id,
            contenders = contenders.len(),
            "Race started"
        );

        let mut last_failure = None;
        while let Some((endpoint, outcome)) = in_flight.next().await {
            match outcome {
                AttemptOutcome::Succeeded(_) => {
                    scope.cancel();
                    while in_flight.next().await.is_some() {}
                    return outcome.into_response(ctx, self.kind(), endpoint, contenders.len());
                }
                AttemptOutcome::Failed(_) => last_failure = Some((endpoint, outcome)),
                AttemptOutcome::Cancelled => {}
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        let (endpoint, outcome) = last_failure.ok_or(PoolError::EmptyPool)?;
        outcome.into_response(ctx, self.kind(), endpoint, contenders.len())
    }

    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream {
        let count = self.contenders(ctx.candidates.len());
        let cancel = ctx.cancel.clone();

        spawn_stream(cancel, move |chunks| async move {
            let contenders = &ctx.candidates[..count];
            let tokens: Vec<CancellationToken> =
                contenders.iter().map(|_| ctx.cancel.child_token()).collect();

            let mut opening: FuturesUnordered<_> = contenders
                .iter()
                .zip(&tokens)
                .enumerate()
                .map(|(index, (endpoint, token))| {
                    let ctx = &ctx;
                    async move { (index, open_stream(ctx, endpoint, token).await) }
                })
                .collect();

            let mut winner = None;
            let mut last_failure = None;
            while let Some((index, open)) = opening.next().await {
                match open {
                    StreamOpen::Opened(opened) => {
                        for (other, token) in tokens.iter().enumerate() {
                            if other != index {
                                token.cancel();
                            }
                        }
                        winner = Some((index, opened));
                        break;
                    }
                    StreamOpen::Failed(failure) => last_failure = Some(failure),
                    StreamOpen::Cancelled => {}
                }
            }

            // Losers observe their cancelled tokens and drop their streams
            while opening.next().await.is_some() {}
            drop(opening);

            match winner {
                Some((index, opened)) => {
                    pump(&ctx, &contenders[index], &tokens[index], opened, &chunks).await
                }
                None if ctx.cancel.is_cancelled() => {
                    StreamChunk::from_pool_error(&PoolError::Cancelled)
                }
                None => match last_failure {
                    Some(failure) => StreamChunk::Error {
                        code: failure.error_code,
                        message: failure.message,
                    },
                    None => StreamChunk::from_pool_error(&PoolError::EmptyPool),
                },
            }
        })
    }
}
