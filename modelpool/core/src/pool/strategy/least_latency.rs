//! Least-latency selection.

use async_trait::async_trait;

use super::{attempt_once, stream_endpoints, DispatchContext, DispatchStrategy, StrategyKind};
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::messages::DispatchResponse;
use crate::pool::health::{HealthStatus, HealthTracker};
use crate::pool::stream::DispatchStream;

/// One call to the candidate with the lowest rolling latency.
///
/// Healthy candidates rank before degraded ones. Endpoints without latency
/// data count as 0 ms so they get measured, unless they have failed since
/// their last success; failures leave no latency sample. Ties go to the
/// earlier candidate, i.e. the better priority.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeastLatencyStrategy;

impl LeastLatencyStrategy {
    fn select<'a>(candidates: &'a [Endpoint], tracker: &HealthTracker) -> Option<&'a Endpoint> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(index, e)| {
                let id = &e.endpoint_id;
                let latency = tracker.average_latency_ms(id).unwrap_or_else(|| {
                    if tracker.consecutive_failures(id) == 0 {
                        0
                    } else {
                        u64::MAX
                    }
                });
                (tracker.status(id) != HealthStatus::Healthy, latency, *index)
            })
            .map(|(_, e)| e)
    }
}

#[async_trait]
impl DispatchStrategy for LeastLatencyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastLatency
    }

    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError> {
        let endpoint = Self::select(&ctx.candidates, &ctx.tracker).ok_or(PoolError::EmptyPool)?;
        attempt_once(ctx, endpoint, ctx.cancel.child_token())
            .await
            .into_response(ctx, self.kind(), endpoint, 1)
    }

    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream {
        let selected = Self::select(&ctx.candidates, &ctx.tracker)
            .cloned()
            .into_iter()
            .collect();
        stream_endpoints(ctx, selected, false)
    }
}
