//! Endpoint Health Tracking
//!
//! Records call outcomes per endpoint and derives a health status from the
//! consecutive outcome counters.
//!
//! # State Machine
//!
//! ```text
//!              failures >= degrade_threshold
//! +---------+ ----------------------------> +----------+
//! | Healthy |                               | Degraded |
//! +---------+ <---------------------------- +----------+
//!      |       successes >= recovery_threshold   |   ^
//!      |                                         |   | any success
//!      |   failures >= unavailable_threshold     v   |
//!      +------------------------------------> +-------------+
//!                                             | Unavailable |
//!                                             +-------------+
//! ```
//!
//! Status is never set by callers. It only moves through
//! [`HealthTracker::record_success`] and [`HealthTracker::record_failure`]
//! (and back to Healthy on an explicit reset).
//!
//! # Thread Safety
//!
//! Records live in a `DashMap` keyed by endpoint id. Each record sits behind
//! its own mutex so a counter update and the status derivation it triggers
//! happen as one step; dispatches against unrelated endpoints never contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

// ============================================================================
// Health Status
// ============================================================================

/// Derived health of an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally
    #[default]
    Healthy,

    /// Recently failing but still routable
    Degraded,

    /// Circuit open; only used when every endpoint is unavailable
    Unavailable,
}

impl HealthStatus {
    /// Whether the endpoint is a routing candidate
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Thresholds driving the health state machine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures moving Healthy to Degraded
    pub degrade_threshold: u32,

    /// Consecutive failures moving any status to Unavailable
    pub unavailable_threshold: u32,

    /// Consecutive successes moving Degraded to Healthy
    pub recovery_success_threshold: u32,

    /// Weight of the newest sample in the rolling latency average (0.0 - 1.0]
    pub latency_ema_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_threshold: 1,
            unavailable_threshold: 3,
            recovery_success_threshold: 2,
            latency_ema_alpha: 0.3,
        }
    }
}

// ============================================================================
// Health Record
// ============================================================================

#[derive(Clone, Debug, Default)]
struct HealthRecord {
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_successes: u64,
    total_failures: u64,
    last_failed_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    avg_latency_ms: Option<f64>,
    status: HealthStatus,
}

impl HealthRecord {
    fn apply_success(&mut self, latency_ms: u64, config: &HealthConfig) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.total_successes += 1;
        self.last_success_at = Some(Utc::now());

        #[allow(clippy::cast_precision_loss)]
        let sample = latency_ms as f64;
        let alpha = config.latency_ema_alpha;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => alpha * sample + (1.0 - alpha) * avg,
            None => sample,
        });

        if self.status == HealthStatus::Unavailable {
            self.status = HealthStatus::Degraded;
        }
        if self.status == HealthStatus::Degraded
            && self.consecutive_successes >= config.recovery_success_threshold
        {
            self.status = HealthStatus::Healthy;
        }
    }

    fn apply_failure(&mut self, config: &HealthConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.total_failures += 1;
        self.last_failed_at = Some(Utc::now());

        if self.consecutive_failures >= config.unavailable_threshold {
            self.status = HealthStatus::Unavailable;
        } else if self.status == HealthStatus::Healthy
            && self.consecutive_failures >= config.degrade_threshold
        {
            self.status = HealthStatus::Degraded;
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn avg_latency_rounded(&self) -> Option<u64> {
        self.avg_latency_ms.map(|avg| avg.round().max(0.0) as u64)
    }
}

// ============================================================================
// Snapshots and Seeds
// ============================================================================

/// Point-in-time health view of one endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealthSnapshot {
    /// Endpoint id
    pub endpoint_id: String,
    /// Model id
    pub model_id: String,
    /// Platform display name
    pub platform_name: String,
    /// Routing priority
    pub priority: i32,
    /// Derived status
    pub status: HealthStatus,
    /// Whether the endpoint is a routing candidate
    pub is_available: bool,
    /// Score in 0..=100
    pub health_score: u8,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Successes since the record was created or reset
    pub total_successes: u64,
    /// Failures since the record was created or reset
    pub total_failures: u64,
    /// Rolling average latency
    pub average_latency_ms: Option<u64>,
    /// Time of the last success
    pub last_success_at: Option<DateTime<Utc>>,
    /// Time of the last failure
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// Persisted per-endpoint counters, imported once when a pool is built
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSeed {
    /// Endpoint the counters belong to
    pub endpoint_id: String,
    /// Consecutive failures at persist time
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Consecutive successes at persist time
    #[serde(default)]
    pub consecutive_successes: u32,
    /// Last known status
    #[serde(default)]
    pub status: HealthStatus,
}

// ============================================================================
// Health Tracker
// ============================================================================

/// Per-endpoint health state for one pool
pub struct HealthTracker {
    records: DashMap<String, Arc<Mutex<HealthRecord>>>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Create a tracker with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create a tracker with custom thresholds
    #[must_use]
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record handle, created lazily on first outcome
    fn entry(&self, endpoint_id: &str) -> Arc<Mutex<HealthRecord>> {
        if let Some(existing) = self.records.get(endpoint_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.records.entry(endpoint_id.to_string()).or_default().value())
    }

    fn read<T>(&self, endpoint_id: &str, f: impl FnOnce(&HealthRecord) -> T) -> Option<T> {
        self.records
            .get(endpoint_id)
            .map(|record| f(&record.value().lock()))
    }

    /// Record a successful call and its latency
    pub fn record_success(&self, endpoint_id: &str, latency_ms: u64) {
        let record = self.entry(endpoint_id);
        let (before, after) = {
            let mut guard = record.lock();
            let before = guard.status;
            guard.apply_success(latency_ms, &self.config);
            (before, guard.status)
        };

        if before != after {
            tracing::info!(
                endpoint = %endpoint_id,
                from = %before,
                to = %after,
                "Endpoint recovering"
            );
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, endpoint_id: &str) {
        let record = self.entry(endpoint_id);
        let (before, after, failures) = {
            let mut guard = record.lock();
            let before = guard.status;
            guard.apply_failure(&self.config);
            (before, guard.status, guard.consecutive_failures)
        };

        if before != after {
            tracing::warn!(
                endpoint = %endpoint_id,
                from = %before,
                to = %after,
                consecutive_failures = failures,
                "Endpoint health degraded"
            );
        }
    }

    /// Current status; endpoints without outcomes are Healthy
    #[must_use]
    pub fn status(&self, endpoint_id: &str) -> HealthStatus {
        self.read(endpoint_id, |r| r.status).unwrap_or_default()
    }

    /// Rolling average latency, if any success has been recorded
    #[must_use]
    pub fn average_latency_ms(&self, endpoint_id: &str) -> Option<u64> {
        self.read(endpoint_id, HealthRecord::avg_latency_rounded)
            .flatten()
    }

    /// Current consecutive failure count
    #[must_use]
    pub fn consecutive_failures(&self, endpoint_id: &str) -> u32 {
        self.read(endpoint_id, |r| r.consecutive_failures)
            .unwrap_or(0)
    }

    /// Whether the endpoint may be routed to
    #[must_use]
    pub fn is_available(&self, endpoint_id: &str) -> bool {
        self.status(endpoint_id).is_available()
    }

    /// Lowest rolling latency among all tracked endpoints
    fn fastest_latency_ms(&self) -> Option<f64> {
        self.records
            .iter()
            .filter_map(|entry| entry.value().lock().avg_latency_ms)
            .min_by(f64::total_cmp)
    }

    /// Health score in 0..=100.
    ///
    /// Healthy endpoints score 70-100, Degraded 30-69, Unavailable 0. Within a
    /// band the score falls as rolling latency grows relative to the fastest
    /// tracked endpoint.
    #[must_use]
    pub fn health_score(&self, endpoint_id: &str) -> u8 {
        let fastest = self.fastest_latency_ms();
        let (status, avg) = self
            .read(endpoint_id, |r| (r.status, r.avg_latency_ms))
            .unwrap_or((HealthStatus::Healthy, None));
        score(status, avg, fastest)
    }

    /// Health view of the given endpoints, in the given order
    #[must_use]
    pub fn snapshot(&self, endpoints: &[Endpoint]) -> Vec<EndpointHealthSnapshot> {
        let fastest = self.fastest_latency_ms();
        endpoints
            .iter()
            .map(|endpoint| {
                let record = self
                    .read(&endpoint.endpoint_id, Clone::clone)
                    .unwrap_or_default();
                EndpointHealthSnapshot {
                    endpoint_id: endpoint.endpoint_id.clone(),
                    model_id: endpoint.model_id.clone(),
                    platform_name: endpoint.platform_name.clone(),
                    priority: endpoint.priority,
                    status: record.status,
                    is_available: record.status.is_available(),
                    health_score: score(record.status, record.avg_latency_ms, fastest),
                    consecutive_failures: record.consecutive_failures,
                    consecutive_successes: record.consecutive_successes,
                    total_successes: record.total_successes,
                    total_failures: record.total_failures,
                    average_latency_ms: record.avg_latency_rounded(),
                    last_success_at: record.last_success_at,
                    last_failed_at: record.last_failed_at,
                }
            })
            .collect()
    }

    /// Force one endpoint back to a fresh Healthy record
    pub fn reset_health(&self, endpoint_id: &str) {
        if let Some(record) = self.records.get(endpoint_id) {
            *record.value().lock() = HealthRecord::default();
        }
        tracing::info!(endpoint = %endpoint_id, "Endpoint health reset");
    }

    /// Force every endpoint back to a fresh Healthy record
    pub fn reset_all(&self) {
        for entry in &self.records {
            *entry.value().lock() = HealthRecord::default();
        }
        tracing::info!(endpoints = self.records.len(), "All endpoint health reset");
    }

    /// Import persisted counters for one endpoint.
    ///
    /// The persisted status is kept unless the failure counter alone already
    /// crosses the unavailable threshold.
    pub(crate) fn seed(&self, seed: &HealthSeed) {
        let record = self.entry(&seed.endpoint_id);
        let mut guard = record.lock();
        *guard = HealthRecord {
            consecutive_failures: seed.consecutive_failures,
            consecutive_successes: seed.consecutive_successes,
            status: seed.status,
            ..HealthRecord::default()
        };
        if guard.consecutive_failures >= self.config.unavailable_threshold {
            guard.status = HealthStatus::Unavailable;
        }
        tracing::debug!(
            endpoint = %seed.endpoint_id,
            status = %guard.status,
            consecutive_failures = guard.consecutive_failures,
            "Seeded endpoint health"
        );
    }

    /// Counters for the given endpoints, in persistable form
    #[must_use]
    pub fn export(&self, endpoints: &[Endpoint]) -> Vec<HealthSeed> {
        endpoints
            .iter()
            .map(|endpoint| {
                let (failures, successes, status) = self
                    .read(&endpoint.endpoint_id, |r| {
                        (r.consecutive_failures, r.consecutive_successes, r.status)
                    })
                    .unwrap_or_default();
                HealthSeed {
                    endpoint_id: endpoint.endpoint_id.clone(),
                    consecutive_failures: failures,
                    consecutive_successes: successes,
                    status,
                }
            })
            .collect()
    }

    /// Number of endpoints with a record
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("tracked", &self.records.len())
            .field("config", &self.config)
            .finish()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
fn score(status: HealthStatus, avg: Option<f64>, fastest: Option<f64>) -> u8 {
    let (base, span) = match status {
        HealthStatus::Unavailable => return 0,
        HealthStatus::Healthy => (70.0, 30.0),
        HealthStatus::Degraded => (30.0, 39.0),
    };

    let ratio = match (avg, fastest) {
        (Some(avg), Some(fastest)) if avg > 0.0 => (fastest / avg).clamp(0.0, 1.0),
        _ => 1.0,
    };

    (base + (span * ratio).round()) as u8
}

// ============================================================================
// Tests
// ============================================================================
