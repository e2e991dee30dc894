//! Dispatch Strategies
//!
//! A strategy decides which endpoint(s) of a pool to call for one dispatch
//! and in what pattern. Strategies are independent algorithm objects selected
//! through [`StrategyKind`] and [`build_strategy`].
//!
//! # Candidates
//!
//! Every strategy receives the same candidate list, built by [`candidates`]:
//!
//! ```text
//! pool endpoints (priority asc, id asc)
//!        |
//!        v
//! drop Unavailable ----> non-empty? ----> candidates
//!                            |
//!                            | no (all Unavailable)
//!                            v
//!                 best-ranked endpoint only
//! ```
//!
//! # Strategies
//!
//! | Kind | Selection | Failover | Concurrency |
//! |------|-----------|----------|-------------|
//! | `fail-fast` | first candidate | none | one call |
//! | `sequential` | priority order | next candidate | one at a time |
//! | `race` | top N candidates | n/a | all at once, first success wins |
//! | `round-robin` | cyclic pointer | none | one call |
//! | `weighted-random` | weight `1 / (priority + 1)` | none | one call |
//! | `least-latency` | lowest rolling latency | none | one call |

mod attempt;
mod fail_fast;
mod least_latency;
mod race;
mod round_robin;
mod sequential;
mod weighted_random;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::health::HealthTracker;
use super::stream::DispatchStream;
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::messages::{DispatchRequest, DispatchResponse};
use crate::transport::Transport;

pub(crate) use attempt::{attempt_once, stream_endpoints, AttemptOutcome};
pub use fail_fast::FailFastStrategy;
pub use least_latency::LeastLatencyStrategy;
pub use race::RaceStrategy;
pub use round_robin::RoundRobinStrategy;
pub use sequential::SequentialStrategy;
pub use weighted_random::WeightedRandomStrategy;

// ============================================================================
// Strategy Kind
// ============================================================================

/// Identifier of a dispatch strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// First candidate only
    FailFast,
    /// Candidates in order until one succeeds
    #[default]
    Sequential,
    /// Concurrent calls, first success wins
    Race,
    /// Cyclic pointer over candidates
    RoundRobin,
    /// Random draw weighted by priority
    WeightedRandom,
    /// Fastest rolling latency
    LeastLatency,
}

impl StrategyKind {
    /// All strategy kinds
    pub const ALL: [Self; 6] = [
        Self::FailFast,
        Self::Sequential,
        Self::Race,
        Self::RoundRobin,
        Self::WeightedRandom,
        Self::LeastLatency,
    ];

    /// Stable identifier used in configuration files
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::Sequential => "sequential",
            Self::Race => "race",
            Self::RoundRobin => "round-robin",
            Self::WeightedRandom => "weighted-random",
            Self::LeastLatency => "least-latency",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown dispatch strategy: {s}"))
    }
}

// ============================================================================
// Strategy Contract
// ============================================================================

/// Everything a strategy needs for one dispatch
#[derive(Clone)]
pub struct DispatchContext {
    /// Routable endpoints in canonical order; never empty
    pub candidates: Vec<Endpoint>,
    /// The request being dispatched
    pub request: DispatchRequest,
    /// Health state of the pool
    pub tracker: Arc<HealthTracker>,
    /// Executor of single calls
    pub transport: Arc<dyn Transport>,
    /// Cancellation scope of the whole dispatch
    pub cancel: CancellationToken,
    /// When the dispatch started
    pub started: Instant,
}

/// A dispatch algorithm
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Run one buffered dispatch.
    ///
    /// Endpoint failures are reported inside the response. `Err` is reserved
    /// for pool-level failures such as cancellation.
    async fn execute(&self, ctx: &DispatchContext) -> Result<DispatchResponse, PoolError>;

    /// Start one streaming dispatch. Selection happens before this returns;
    /// chunks are produced lazily.
    fn execute_stream(&self, ctx: DispatchContext) -> DispatchStream;
}

/// Create the strategy for a kind
///
/// `race_max_concurrency` caps how many candidates the race strategy starts;
/// other strategies ignore it.
#[must_use]
pub fn build_strategy(
    kind: StrategyKind,
    race_max_concurrency: Option<usize>,
) -> Box<dyn DispatchStrategy> {
    match kind {
        StrategyKind::FailFast => Box::new(FailFastStrategy),
        StrategyKind::Sequential => Box::new(SequentialStrategy),
        StrategyKind::Race => Box::new(RaceStrategy::new(race_max_concurrency)),
        StrategyKind::RoundRobin => Box::new(RoundRobinStrategy::new()),
        StrategyKind::WeightedRandom => Box::new(WeightedRandomStrategy::new()),
        StrategyKind::LeastLatency => Box::new(LeastLatencyStrategy),
    }
}

/// Routable endpoints for one dispatch.
///
/// `endpoints` must already be in canonical order. Unavailable endpoints are
/// dropped; when that leaves nothing, the best-ranked endpoint is returned
/// alone so the dispatch still makes one attempt.
#[must_use]
pub fn candidates(endpoints: &[Endpoint], tracker: &HealthTracker) -> Vec<Endpoint> {
    let available: Vec<Endpoint> = endpoints
        .iter()
        .filter(|e| tracker.is_available(&e.endpoint_id))
        .cloned()
        .collect();

    if !available.is_empty() || endpoints.is_empty() {
        return available;
    }

    let best = endpoints[0].clone();
    tracing::warn!(
        endpoint = %best.endpoint_id,
        total = endpoints.len(),
        "All endpoints unavailable, falling back to best-ranked endpoint"
    );
    vec![best]
}
