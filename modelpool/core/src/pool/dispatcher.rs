//! Pool Dispatcher
//!
//! [`PoolDispatcher`] is the public face of one named pool. It owns the
//! pool's endpoint snapshot, its strategy and its health tracker, and turns
//! every pool-level failure into the uniform error taxonomy:
//!
//! | Condition | Code | Status |
//! |-----------|------|--------|
//! | pool has no endpoints | `EMPTY_POOL` | 503 |
//! | caller cancelled | `CANCELLED` | 499 |
//! | anything unexpected (including panics) | `POOL_ERROR` | 500 |
//!
//! `dispatch` never fails past this boundary: it always returns a
//! [`DispatchResponse`]. Endpoint failures are reported by the strategy
//! inside that response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::health::{EndpointHealthSnapshot, HealthConfig, HealthSeed, HealthTracker};
use super::panic_message;
use super::strategy::{build_strategy, candidates, DispatchContext, DispatchStrategy, StrategyKind};
use super::stream::DispatchStream;
use super::tester::{EndpointTestResult, EndpointTester};
use crate::endpoint::{sort_endpoints, Endpoint};
use crate::error::PoolError;
use crate::messages::{DispatchRequest, DispatchResponse};
use crate::transport::Transport;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration of one pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name
    pub name: String,

    /// Dispatch strategy
    pub strategy: StrategyKind,

    /// Cap on concurrent race contenders (race strategy only)
    pub race_max_concurrency: Option<usize>,

    /// Health thresholds
    pub health: HealthConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            strategy: StrategyKind::default(),
            race_max_concurrency: None,
            health: HealthConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Named pool with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the dispatch strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the race concurrency cap
    #[must_use]
    pub fn with_race_max_concurrency(mut self, cap: usize) -> Self {
        self.race_max_concurrency = Some(cap);
        self
    }

    /// Set the health thresholds
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }
}

// ============================================================================
// Pool Dispatcher
// ============================================================================

/// Dispatches requests across one pool of endpoints
pub struct PoolDispatcher {
    config: PoolConfig,
    endpoints: Vec<Endpoint>,
    strategy: Box<dyn DispatchStrategy>,
    tracker: Arc<HealthTracker>,
    transport: Arc<dyn Transport>,
    tester: EndpointTester,
}

impl PoolDispatcher {
    /// Create a dispatcher with a fresh health tracker
    pub fn new(config: PoolConfig, endpoints: Vec<Endpoint>, transport: Arc<dyn Transport>) -> Self {
        let tracker = Arc::new(HealthTracker::with_config(config.health.clone()));
        Self::with_tracker(config, endpoints, tracker, transport)
    }

    /// Create a dispatcher around an existing (e.g. seeded) health tracker
    pub fn with_tracker(
        config: PoolConfig,
        mut endpoints: Vec<Endpoint>,
        tracker: Arc<HealthTracker>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        sort_endpoints(&mut endpoints);
        let strategy = build_strategy(config.strategy, config.race_max_concurrency);

        tracing::info!(
            pool = %config.name,
            strategy = %config.strategy,
            endpoints = endpoints.len(),
            transport = transport.name(),
            "Model pool created"
        );

        Self {
            tester: EndpointTester::new(Arc::clone(&transport)),
            config,
            endpoints,
            strategy,
            tracker,
            transport,
        }
    }

    /// Replace the strategy object (e.g. a seeded weighted-random strategy)
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn DispatchStrategy>) -> Self {
        self.config.strategy = strategy.kind();
        self.strategy = strategy;
        self
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Endpoints in canonical order
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Health tracker of this pool
    #[must_use]
    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    fn context(&self, request: DispatchRequest, cancel: CancellationToken) -> DispatchContext {
        DispatchContext {
            candidates: candidates(&self.endpoints, &self.tracker),
            request,
            tracker: Arc::clone(&self.tracker),
            transport: Arc::clone(&self.transport),
            cancel,
            started: Instant::now(),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch a request and wait for the buffered response
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        self.dispatch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch a request that the caller can cancel through `cancel`
    pub async fn dispatch_with_cancel(
        &self,
        request: DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResponse {
        let started = Instant::now();
        let kind = self.strategy.kind();
        let request_id = request.request_id.clone();

        if self.endpoints.is_empty() {
            tracing::warn!(pool = %self.config.name, request_id = %request_id, "Dispatch to empty pool");
            return DispatchResponse::from_pool_error(
                &PoolError::EmptyPool,
                kind,
                request_id,
                started.elapsed(),
            );
        }

        let ctx = self.context(request, cancel.child_token());
        let run = AssertUnwindSafe(self.strategy.execute(&ctx)).catch_unwind();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PoolError::Cancelled),
            outcome = run => outcome.unwrap_or_else(|payload| {
                Err(PoolError::Internal(panic_message(payload.as_ref())))
            }),
        };

        match result {
            Ok(response) => {
                tracing::info!(
                    pool = %self.config.name,
                    request_id = %request_id,
                    strategy = %kind,
                    success = response.success,
                    status_code = response.status_code,
                    endpoints_attempted = response.endpoints_attempted,
                    duration_ms = response.duration_ms,
                    "Dispatch finished"
                );
                response
            }
            Err(error) => {
                match &error {
                    PoolError::Cancelled => {
                        tracing::info!(pool = %self.config.name, request_id = %request_id, "Dispatch cancelled");
                    }
                    other => {
                        tracing::error!(
                            pool = %self.config.name,
                            request_id = %request_id,
                            error = %other,
                            "Dispatch failed"
                        );
                    }
                }
                DispatchResponse::from_pool_error(&error, kind, request_id, started.elapsed())
            }
        }
    }

    /// Dispatch a request as a chunk stream
    pub fn dispatch_stream(&self, request: DispatchRequest) -> DispatchStream {
        self.dispatch_stream_with_cancel(request, &CancellationToken::new())
    }

    /// Dispatch a request as a chunk stream that `cancel` can abort
    ///
    /// Dropping the returned stream cancels the dispatch without touching
    /// `cancel`.
    pub fn dispatch_stream_with_cancel(
        &self,
        request: DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchStream {
        if self.endpoints.is_empty() {
            tracing::warn!(
                pool = %self.config.name,
                request_id = %request.request_id,
                "Stream dispatch to empty pool"
            );
            return DispatchStream::from_error(&PoolError::EmptyPool);
        }
        if cancel.is_cancelled() {
            return DispatchStream::from_error(&PoolError::Cancelled);
        }

        tracing::debug!(
            pool = %self.config.name,
            request_id = %request.request_id,
            strategy = %self.strategy.kind(),
            "Stream dispatch started"
        );
        let ctx = self.context(request, cancel.child_token());
        self.strategy.execute_stream(ctx)
    }

    // ========================================================================
    // Testing
    // ========================================================================

    /// Probe one endpoint (by id) or every endpoint, bypassing the strategy.
    ///
    /// Every probe outcome is recorded into the health tracker. An unknown id
    /// yields no results.
    pub async fn test_endpoints(
        &self,
        endpoint_id: Option<&str>,
        request: Option<DispatchRequest>,
    ) -> Vec<EndpointTestResult> {
        let targets: Vec<&Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| endpoint_id.map_or(true, |id| e.endpoint_id == id))
            .collect();

        if targets.is_empty() {
            tracing::warn!(pool = %self.config.name, endpoint = ?endpoint_id, "No endpoint to test");
            return Vec::new();
        }

        let request = request.as_ref();
        let mut results = join_all(targets.iter().map(|e| self.tester.test(e, request))).await;

        for result in &mut results {
            if result.success {
                self.tracker
                    .record_success(&result.endpoint_id, result.latency_ms);
            } else {
                self.tracker.record_failure(&result.endpoint_id);
            }
            result.health_status = self.tracker.status(&result.endpoint_id);
        }
        results
    }

    // ========================================================================
    // Health Management
    // ========================================================================

    /// Health of every endpoint in the pool
    #[must_use]
    pub fn health_snapshot(&self) -> Vec<EndpointHealthSnapshot> {
        self.tracker.snapshot(&self.endpoints)
    }

    /// Reset one endpoint to Healthy
    pub fn reset_endpoint_health(&self, endpoint_id: &str) {
        self.tracker.reset_health(endpoint_id);
    }

    /// Reset every endpoint to Healthy
    pub fn reset_all_health(&self) {
        self.tracker.reset_all();
    }

    /// Current counters in persistable form
    #[must_use]
    pub fn export_health(&self) -> Vec<HealthSeed> {
        self.tracker.export(&self.endpoints)
    }
}

impl std::fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDispatcher")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints)
            .field("transport", &self.transport.name())
            .finish()
    }
}
