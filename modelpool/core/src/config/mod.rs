//! TOML Pool File
//!
//! Pools, platforms and persisted health counters can be described in one
//! TOML file. [`StaticConfigSource`] serves a loaded file to the
//! [`PoolFactory`](crate::pool::PoolFactory).
//!
//! # File Location Priority
//!
//! 1. `--config` on the command line
//! 2. `MODELPOOL_CONFIG` environment variable
//! 3. `$XDG_CONFIG_HOME/modelpool/pools.toml` (typically `~/.config/modelpool/pools.toml`)
//!
//! An explicitly named file must exist. A missing default file yields an empty
//! configuration.
//!
//! # Example
//!
//! ```toml
//! [dispatch]
//! timeout_secs = 60
//!
//! [health]
//! degrade_threshold = 1
//! unavailable_threshold = 3
//! recovery_success_threshold = 2
//! latency_ema_alpha = 0.3
//!
//! [[platforms]]
//! platform_id = "openai"
//! name = "OpenAI"
//! api_url = "https://api.openai.com/v1"
//! encrypted_api_key = "env:OPENAI_API_KEY"
//!
//! [[groups]]
//! name = "chat"
//! strategy = "sequential"
//!
//! [[groups.models]]
//! platform_id = "openai"
//! model_id = "gpt-4o-mini"
//! priority = 1
//!
//! [[health_seeds]]
//! endpoint_id = "openai:gpt-4o-mini"
//! consecutive_failures = 1
//! status = "degraded"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::DEFAULT_TIMEOUT_SECS;
use crate::pool::factory::{ModelGroup, PlatformRecord, PoolConfigSource};
use crate::pool::health::{HealthConfig, HealthSeed};

/// Environment variable naming the pool file
pub const CONFIG_PATH_ENV: &str = "MODELPOOL_CONFIG";

/// Environment variable overriding `dispatch.timeout_secs`
pub const TIMEOUT_ENV: &str = "MODELPOOL_TIMEOUT_SECS";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading the pool file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the pool file path came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// XDG default location
    File,
    /// No file; built-in defaults
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Structures
// =============================================================================

/// `[dispatch]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Per-attempt timeout of requests built by the CLI
    pub timeout_secs: u64,
}

impl Default for DispatchToml {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Top-level pool file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolFile {
    /// Dispatch defaults
    pub dispatch: DispatchToml,

    /// Health thresholds shared by all pools
    pub health: HealthConfig,

    /// Provider platforms
    pub platforms: Vec<PlatformRecord>,

    /// Model groups; each becomes one pool
    pub groups: Vec<ModelGroup>,

    /// Persisted health counters replayed when a pool is built
    pub health_seeds: Vec<HealthSeed>,
}

impl PoolFile {
    /// Parse and validate TOML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for malformed TOML and
    /// [`ConfigError::ValidationError`] for inconsistent values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let health = &self.health;
        if health.degrade_threshold == 0
            || health.unavailable_threshold == 0
            || health.recovery_success_threshold == 0
        {
            return Err(ConfigError::ValidationError(
                "health thresholds must be at least 1".into(),
            ));
        }
        if !(health.latency_ema_alpha > 0.0 && health.latency_ema_alpha <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "health.latency_ema_alpha must be in (0, 1], got {}",
                health.latency_ema_alpha
            )));
        }
        if self.dispatch.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.timeout_secs must be positive".into(),
            ));
        }

        let mut platform_ids = HashSet::new();
        for platform in &self.platforms {
            if !platform_ids.insert(platform.platform_id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate platform: {}",
                    platform.platform_id
                )));
            }
        }

        let mut group_names = HashSet::new();
        for group in &self.groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate group: {}",
                    group.name
                )));
            }
            if group.race_max_concurrency == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "group {}: race_max_concurrency must be positive",
                    group.name
                )));
            }
        }

        Ok(())
    }

    /// Apply environment overrides
    fn apply_env(&mut self) {
        if let Ok(timeout) = std::env::var(TIMEOUT_ENV) {
            match timeout.parse::<u64>() {
                Ok(secs) if secs > 0 => self.dispatch.timeout_secs = secs,
                _ => tracing::warn!(value = %timeout, "Ignoring invalid {TIMEOUT_ENV}"),
            }
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// A pool file together with where it came from
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    /// Parsed file
    pub file: PoolFile,

    /// Path that was read, if any
    pub path: Option<PathBuf>,

    /// Where the path came from
    pub source: ConfigSource,
}

/// Default pool file path
///
/// Returns `$XDG_CONFIG_HOME/modelpool/pools.toml` or
/// `~/.config/modelpool/pools.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("modelpool").join("pools.toml"))
}

fn resolve_path(
    cli: Option<PathBuf>,
    env: Option<String>,
    default: Option<PathBuf>,
) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli {
        return (Some(path), ConfigSource::Cli);
    }
    if let Some(path) = env.filter(|p| !p.trim().is_empty()) {
        return (Some(PathBuf::from(path)), ConfigSource::Env);
    }
    (default, ConfigSource::File)
}

/// Load the pool file following the location priority
///
/// # Errors
///
/// An explicitly named file that cannot be read is an error; so is any file
/// that cannot be parsed or validated.
pub fn load_config(cli_path: Option<PathBuf>) -> Result<LoadedConfig, ConfigError> {
    let (path, source) = resolve_path(
        cli_path,
        std::env::var(CONFIG_PATH_ENV).ok(),
        default_config_path(),
    );

    let mut loaded = match path {
        Some(path) if source != ConfigSource::File || path.exists() => LoadedConfig {
            file: load_config_from_path(&path)?,
            path: Some(path),
            source,
        },
        other => {
            tracing::debug!(
                path = ?other,
                "Pool file not found, using empty configuration"
            );
            LoadedConfig {
                file: PoolFile::default(),
                path: None,
                source: ConfigSource::Default,
            }
        }
    };

    loaded.file.apply_env();
    Ok(loaded)
}

/// Read, parse and validate one pool file
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config_from_path(path: &Path) -> Result<PoolFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file = PoolFile::from_toml_str(&content)?;

    tracing::info!(
        path = %path.display(),
        platforms = file.platforms.len(),
        groups = file.groups.len(),
        "Loaded pool file"
    );
    Ok(file)
}

// =============================================================================
// Static Configuration Source
// =============================================================================

/// Serves a loaded pool file to the pool factory
#[derive(Clone, Debug)]
pub struct StaticConfigSource {
    file: Arc<PoolFile>,
}

impl StaticConfigSource {
    /// Serve `file`
    #[must_use]
    pub fn new(file: PoolFile) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    /// The served file
    #[must_use]
    pub fn file(&self) -> &PoolFile {
        &self.file
    }
}

#[async_trait]
impl PoolConfigSource for StaticConfigSource {
    async fn model_group(&self, name: &str) -> anyhow::Result<Option<ModelGroup>> {
        Ok(self.file.groups.iter().find(|g| g.name == name).cloned())
    }

    async fn platforms(&self) -> anyhow::Result<Vec<PlatformRecord>> {
        Ok(self.file.platforms.clone())
    }

    async fn health_seeds(&self, endpoint_ids: &[String]) -> anyhow::Result<Vec<HealthSeed>> {
        Ok(self
            .file
            .health_seeds
            .iter()
            .filter(|seed| endpoint_ids.contains(&seed.endpoint_id))
            .cloned()
            .collect())
    }

    async fn group_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.file.groups.iter().map(|g| g.name.clone()).collect())
    }
}
