//! Fail-fast: call the first candidate, return whatever happens.

use async_trait::async_trait;

use super::{attempt_once, stream_endpoints, DispatchContext, DispatchStrategy, StrategyKind};
use crate::error::PoolError;
use crate::messages::DispatchResponse;
use crate::pool::stream::DispatchStream;

/// Single call to the best-ranked candidate, no failover
#[derive(Clone, Copy, Debug, Default)]
pub struct FailFastStrategy;

#[async_trait]
impl DispatchStrategy for FailFastStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FailFast
    }

    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError> {
        let endpoint = ctx.candidates.first().ok_or(PoolError::EmptyPool)?;
        attempt_once(ctx, endpoint, ctx.cancel.child_token())
            .await
            .into_response(ctx, self.kind(), endpoint, 1)
    }

    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream {
        let selected = ctx.candidates.iter().take(1).cloned().collect();
        stream_endpoints(ctx, selected, false)
    }
}
