//! Pool Construction
//!
//! Builds dispatchers from external configuration. The surrounding system
//! implements [`PoolConfigSource`] (model groups, platform records, persisted
//! health counters) and supplies a [`SecretDecryptor`] for the platform
//! credentials.
//!
//! ```text
//! ModelGroup ----+
//!                |     enabled platform?     decrypt key
//! PlatformRecord-+--> ------------------ --> ----------- --> Endpoint
//!                                                               |
//! HealthSeed ----------------- replay once ---------------> HealthTracker
//!                                                               |
//!                                                        PoolDispatcher
//! ```
//!
//! Seeding is a one-time import; nothing is written back to the source.
//! [`PoolRegistry`] keeps built dispatchers for the process lifetime so
//! health gathered by dispatches is not lost between requests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::dispatcher::{PoolConfig, PoolDispatcher};
use super::health::{HealthConfig, HealthSeed, HealthTracker};
use super::strategy::StrategyKind;
use crate::endpoint::Endpoint;
use crate::error::FactoryError;
use crate::transport::Transport;

// ============================================================================
// Configuration Records
// ============================================================================

/// One model of a group, served by one platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// Platform serving the model
    pub platform_id: String,

    /// Provider-side model identifier
    pub model_id: String,

    /// Routing priority (lower is preferred)
    #[serde(default)]
    pub priority: i32,

    /// Per-endpoint output cap
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Per-endpoint prompt cache toggle
    #[serde(default)]
    pub prompt_cache_enabled: Option<bool>,
}

/// A named group of interchangeable models
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelGroup {
    /// Group (and pool) name
    pub name: String,

    /// Dispatch strategy of the pool
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Cap on concurrent race contenders
    #[serde(default)]
    pub race_max_concurrency: Option<usize>,

    /// Member models
    #[serde(default)]
    pub models: Vec<ModelRef>,
}

fn default_platform_type() -> String {
    "openai".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A provider platform with its encrypted credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
    /// Platform identifier
    pub platform_id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Provider family
    #[serde(default = "default_platform_type")]
    pub platform_type: String,

    /// Base URL of the provider API
    pub api_url: String,

    /// Credential as stored; passed through the decryptor
    #[serde(default)]
    pub encrypted_api_key: String,

    /// Disabled platforms contribute no endpoints
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl std::fmt::Debug for PlatformRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRecord")
            .field("platform_id", &self.platform_id)
            .field("name", &self.name)
            .field("platform_type", &self.platform_type)
            .field("api_url", &self.api_url)
            .field("encrypted_api_key", &"<redacted>")
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// External Collaborators
// ============================================================================

/// Read-only source of pool configuration
#[async_trait]
pub trait PoolConfigSource: Send + Sync {
    /// Look up a model group by name
    async fn model_group(&self, name: &str) -> anyhow::Result<Option<ModelGroup>>;

    /// All known platforms
    async fn platforms(&self) -> anyhow::Result<Vec<PlatformRecord>>;

    /// Persisted health counters for the given endpoints
    async fn health_seeds(&self, endpoint_ids: &[String]) -> anyhow::Result<Vec<HealthSeed>>;

    /// Names of all model groups
    async fn group_names(&self) -> anyhow::Result<Vec<String>>;
}

/// Turns a stored credential into the key sent to the provider
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt one stored credential
    fn decrypt(&self, stored: &str) -> anyhow::Result<String>;
}

impl<F> SecretDecryptor for F
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        self(stored)
    }
}

/// Credentials are stored in the clear
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaintextDecryptor;

impl SecretDecryptor for PlaintextDecryptor {
    fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        Ok(stored.to_string())
    }
}

/// Resolves `env:NAME` references from the process environment.
///
/// Any other value is returned unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSecretDecryptor;

impl SecretDecryptor for EnvSecretDecryptor {
    fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        match stored.strip_prefix("env:") {
            Some(var) => std::env::var(var)
                .map_err(|e| anyhow::anyhow!("credential variable {var} unavailable: {e}")),
            None => Ok(stored.to_string()),
        }
    }
}

// ============================================================================
// Pool Factory
// ============================================================================

/// Builds dispatchers from a configuration source
pub struct PoolFactory {
    source: Arc<dyn PoolConfigSource>,
    decryptor: Arc<dyn SecretDecryptor>,
    transport: Arc<dyn Transport>,
    health: HealthConfig,
}

impl PoolFactory {
    /// Create a factory with default health thresholds
    pub fn new(
        source: Arc<dyn PoolConfigSource>,
        decryptor: Arc<dyn SecretDecryptor>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            source,
            decryptor,
            transport,
            health: HealthConfig::default(),
        }
    }

    /// Use custom health thresholds for built pools
    #[must_use]
    pub fn with_health_config(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Configuration source this factory reads
    #[must_use]
    pub fn source(&self) -> &Arc<dyn PoolConfigSource> {
        &self.source
    }

    /// Endpoints of a group.
    ///
    /// Models on missing or disabled platforms, and models whose credential
    /// cannot be decrypted, are skipped.
    pub async fn build_endpoints(&self, group: &ModelGroup) -> Result<Vec<Endpoint>, FactoryError> {
        let platforms: HashMap<String, PlatformRecord> = self
            .source
            .platforms()
            .await?
            .into_iter()
            .map(|p| (p.platform_id.clone(), p))
            .collect();

        let mut endpoints = Vec::with_capacity(group.models.len());
        for model in &group.models {
            let Some(platform) = platforms.get(&model.platform_id) else {
                tracing::warn!(
                    group = %group.name,
                    platform = %model.platform_id,
                    model = %model.model_id,
                    "Skipping model on unknown platform"
                );
                continue;
            };
            if !platform.enabled {
                tracing::warn!(
                    group = %group.name,
                    platform = %platform.platform_id,
                    model = %model.model_id,
                    "Skipping model on disabled platform"
                );
                continue;
            }

            let key = match self.decryptor.decrypt(&platform.encrypted_api_key) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(
                        group = %group.name,
                        platform = %platform.platform_id,
                        error = %e,
                        "Skipping model, credential could not be decrypted"
                    );
                    continue;
                }
            };

            let mut endpoint = Endpoint::new(
                &platform.platform_id,
                &model.model_id,
                &platform.api_url,
                key,
            )
            .with_priority(model.priority);
            if !platform.name.is_empty() {
                endpoint = endpoint.with_platform(&platform.name, &platform.platform_type);
            } else {
                endpoint.platform_type.clone_from(&platform.platform_type);
            }
            endpoint.max_tokens = model.max_tokens;
            endpoint.prompt_cache_enabled = model.prompt_cache_enabled;
            endpoints.push(endpoint);
        }

        Ok(endpoints)
    }

    /// Build the dispatcher of a named group, seeded with persisted health
    pub async fn build(&self, group_name: &str) -> Result<PoolDispatcher, FactoryError> {
        let group = self
            .source
            .model_group(group_name)
            .await?
            .ok_or_else(|| FactoryError::GroupNotFound(group_name.to_string()))?;

        let endpoints = self.build_endpoints(&group).await?;

        let tracker = Arc::new(HealthTracker::with_config(self.health.clone()));
        let ids: Vec<String> = endpoints.iter().map(|e| e.endpoint_id.clone()).collect();
        let seeds = self.source.health_seeds(&ids).await?;
        let mut seeded = 0;
        for seed in seeds.iter().filter(|s| ids.contains(&s.endpoint_id)) {
            tracker.seed(seed);
            seeded += 1;
        }

        tracing::info!(
            group = %group.name,
            endpoints = endpoints.len(),
            skipped = group.models.len() - endpoints.len(),
            seeded,
            "Built model pool"
        );

        let config = PoolConfig {
            name: group.name,
            strategy: group.strategy,
            race_max_concurrency: group.race_max_concurrency,
            health: self.health.clone(),
        };
        Ok(PoolDispatcher::with_tracker(
            config,
            endpoints,
            tracker,
            Arc::clone(&self.transport),
        ))
    }
}

impl std::fmt::Debug for PoolFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolFactory")
            .field("transport", &self.transport.name())
            .field("health", &self.health)
            .finish()
    }
}

// ============================================================================
// Pool Registry
// ============================================================================

/// Process-lifetime cache of built dispatchers, keyed by group name
pub struct PoolRegistry {
    factory: PoolFactory,
    pools: DashMap<String, Arc<PoolDispatcher>>,
}

impl PoolRegistry {
    /// Empty registry building through `factory`
    #[must_use]
    pub fn new(factory: PoolFactory) -> Self {
        Self {
            factory,
            pools: DashMap::new(),
        }
    }

    /// Cached dispatcher of a group, built on first use
    pub async fn get_or_build(&self, group_name: &str) -> Result<Arc<PoolDispatcher>, FactoryError> {
        if let Some(pool) = self.pools.get(group_name) {
            return Ok(Arc::clone(pool.value()));
        }

        let built = Arc::new(self.factory.build(group_name).await?);
        // A concurrent build may have won; keep the first one stored
        let pool = self
            .pools
            .entry(group_name.to_string())
            .or_insert(built)
            .value()
            .clone();
        Ok(pool)
    }

    /// Drop a cached dispatcher; the next lookup rebuilds and reseeds it
    pub fn invalidate(&self, group_name: &str) -> bool {
        let removed = self.pools.remove(group_name).is_some();
        if removed {
            tracing::info!(group = %group_name, "Model pool invalidated");
        }
        removed
    }

    /// Names of the cached pools
    #[must_use]
    pub fn cached(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Factory used for builds
    #[must_use]
    pub fn factory(&self) -> &PoolFactory {
        &self.factory
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("cached", &self.cached())
            .finish()
    }
}
