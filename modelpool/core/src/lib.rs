//! Modelpool Core - Load Balancing and Circuit Breaking for LLM Endpoints
//!
//! This crate turns a named group of interchangeable model endpoints into a
//! single logical model. A dispatch picks endpoints according to a strategy,
//! fails over when an endpoint errors, and feeds every outcome into a health
//! tracker that takes persistently failing endpoints out of rotation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                 │
//! │        (CLI, services, anything holding a PoolDispatcher)         │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ DispatchRequest
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PoolDispatcher                             │
//! │  ┌───────────────┐   ┌──────────────────┐   ┌─────────────────┐  │
//! │  │ DispatchStrat │──▶│  HealthTracker   │   │ EndpointTester  │  │
//! │  │ (6 variants)  │   │ (per endpoint)   │   │ (probes)        │  │
//! │  └───────┬───────┘   └──────────────────┘   └────────┬────────┘  │
//! └──────────┼───────────────────────────────────────────┼───────────┘
//!            │ one call per attempt                      │
//!            ▼                                           ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Transport (trait)                             │
//! │              OpenAiCompatTransport (reqwest)                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pools are usually built by a [`PoolFactory`] from a [`PoolConfigSource`]
//! (for example the TOML-backed [`config::StaticConfigSource`]) and cached
//! in a [`PoolRegistry`].
//!
//! # Key Types
//!
//! - [`PoolDispatcher`]: buffered and streaming dispatch over one pool
//! - [`StrategyKind`]: fail-fast, sequential, race, round-robin,
//!   weighted-random, least-latency
//! - [`HealthTracker`]: consecutive-outcome counters and derived status
//! - [`DispatchStream`]: lazy, cancellable stream of [`StreamChunk`]s
//! - [`Transport`]: the seam between pool logic and provider wire formats
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use modelpool_core::{
//!     DispatchRequest, Endpoint, OpenAiCompatTransport, PoolConfig, PoolDispatcher,
//!     StrategyKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(OpenAiCompatTransport::new()?);
//!
//!     let endpoints = vec![
//!         Endpoint::new("openai", "gpt-4o-mini", "https://api.openai.com/v1", "sk-...")
//!             .with_priority(1),
//!         Endpoint::new("deepseek", "deepseek-chat", "https://api.deepseek.com/v1", "sk-...")
//!             .with_priority(2),
//!     ];
//!
//!     let pool = PoolDispatcher::new(
//!         PoolConfig::new("chat").with_strategy(StrategyKind::Sequential),
//!         endpoints,
//!         transport,
//!     );
//!
//!     let response = pool.dispatch(DispatchRequest::chat("Hello")).await;
//!     println!("{} via {:?}", response.status_code, response.endpoint);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod pool;
pub mod transport;

// Re-export commonly used types
pub use endpoint::{endpoint_id, sort_endpoints, DispatchedEndpoint, Endpoint};
pub use error::{FactoryError, PoolError, TransportError};
pub use messages::{
    DispatchRequest, DispatchResponse, ErrorCode, ModelType, StreamChunk, TokenUsage,
    DEFAULT_TIMEOUT_SECS,
};

pub use pool::{
    build_strategy, DispatchContext, DispatchStrategy, DispatchStream, EndpointHealthSnapshot,
    EndpointTestResult, EndpointTester, EnvSecretDecryptor, HealthConfig, HealthSeed,
    HealthStatus, HealthTracker, ModelGroup, ModelRef, PlaintextDecryptor, PlatformRecord,
    PoolConfig, PoolConfigSource, PoolDispatcher, PoolFactory, PoolRegistry, SecretDecryptor,
    StrategyKind,
};

pub use transport::{
    OpenAiCompatTransport, Transport, TransportEvent, TransportResult, TransportStream,
};

// Config re-exports
pub use config::{
    load_config, load_config_from_path, ConfigError, ConfigSource, LoadedConfig, PoolFile,
    StaticConfigSource,
};
