//! Round-robin over the candidate list.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{attempt_once, stream_endpoints, DispatchContext, DispatchStrategy, StrategyKind};
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::messages::DispatchResponse;
use crate::pool::stream::DispatchStream;

/// Cyclic selection; each dispatch advances the pointer, failed or not
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Start at the first candidate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn select<'a>(&self, candidates: &'a [Endpoint]) -> Option<&'a Endpoint> {
        if candidates.is_empty() {
            return None;
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(slot)
    }
}

#[async_trait]
impl DispatchStrategy for RoundRobinStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError> {
        let endpoint = self.select(&ctx.candidates).ok_or(PoolError::EmptyPool)?;
        attempt_once(ctx, endpoint, ctx.cancel.child_token())
            .await
            .into_response(ctx, self.kind(), endpoint, 1)
    }

    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream {
        let selected = self.select(&ctx.candidates).cloned().into_iter().collect();
        stream_endpoints(ctx, selected, false)
    }
}
