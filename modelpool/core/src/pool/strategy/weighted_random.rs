//! Weighted random selection favouring low priority numbers.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{attempt_once, stream_endpoints, DispatchContext, DispatchStrategy, StrategyKind};
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::messages::DispatchResponse;
use crate::pool::stream::DispatchStream;

/// Selection weight of an endpoint: `1 / (priority + 1)`.
///
/// Negative priorities are treated as 0.
#[must_use]
pub fn priority_weight(priority: i32) -> f64 {
    1.0 / (f64::from(priority.max(0)) + 1.0)
}

/// One call to a randomly drawn candidate
#[derive(Debug)]
pub struct WeightedRandomStrategy {
    rng: Mutex<StdRng>,
}

impl WeightedRandomStrategy {
    /// Seeded from OS entropy
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic draws from a fixed seed
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn select<'a>(&self, candidates: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let weights = candidates.iter().map(|e| priority_weight(e.priority));
        // Weights are always positive and finite, so this only fails when
        // there are no candidates.
        let index = WeightedIndex::new(weights).ok()?;
        let slot = index.sample(&mut *self.rng.lock());
        candidates.get(slot)
    }
}

impl Default for WeightedRandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchStrategy for WeightedRandomStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WeightedRandom
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
