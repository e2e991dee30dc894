//! Sequential failover in priority order.

use async_trait::async_trait;

use super::{
    attempt_once, stream_endpoints, AttemptOutcome, DispatchContext, DispatchStrategy,
    StrategyKind,
};
use crate::error::PoolError;
use crate::messages::DispatchResponse;
use crate::pool::stream::DispatchStream;

/// Try candidates one at a time until one succeeds.
///
/// Each attempt gets the full per-attempt timeout. When every candidate
/// fails, the last failure is returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialStrategy;

#[async_trait]
impl DispatchStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError> {
        let mut last = None;

        for (index, endpoint) in ctx.candidates.iter().enumerate() {
            let outcome = attempt_once(ctx, endpoint, ctx.cancel.child_token()).await;
            match outcome {
                AttemptOutcome::Failed(_) => {
                    tracing::debug!(
                        endpoint = %endpoint.endpoint_id,
                        request_id = %ctx.request.request_id,
                        remaining = ctx.candidates.len() - index - 1,
                        "Failing over to next endpoint"
                    );
                    last = Some((endpoint, outcome, index + 1));
                }
                outcome => return outcome.into_response(ctx, self.kind(), endpoint, index + 1),
            }
        }

        let (endpoint, outcome, attempted) = last.ok_or(PoolError::EmptyPool)?;
        outcome.into_response(ctx, self.kind(), endpoint, attempted)
    }

    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream {
        let selected = ctx.candidates.clone();
        stream_endpoints(ctx, selected, true)
    }
}
