//! Model Pools
//!
//! A pool is a named, ordered set of interchangeable endpoints dispatched
//! under one strategy.
//!
//! ```text
//! caller --> PoolDispatcher --> DispatchStrategy --> Transport (per attempt)
//!                 |                    |
//!                 |                    +--> HealthTracker (every outcome)
//!                 +--> EndpointTester (probes, bypass the strategy)
//! ```
//!
//! - [`health`]: per-endpoint outcome counters and derived status
//! - [`strategy`]: the six dispatch algorithms
//! - [`stream`]: lazy, cancellable chunk streams
//! - [`dispatcher`]: the public dispatch and management surface
//! - [`factory`]: pools built from external configuration
//! - [`tester`]: diagnostic probes

pub mod dispatcher;
pub mod factory;
pub mod health;
pub mod strategy;
pub mod stream;
pub mod tester;

#[cfg(test)]
pub(crate) mod test_utils;

use std::any::Any;

pub use dispatcher::{PoolConfig, PoolDispatcher};
pub use factory::{
    EnvSecretDecryptor, ModelGroup, ModelRef, PlaintextDecryptor, PlatformRecord,
    PoolConfigSource, PoolFactory, PoolRegistry, SecretDecryptor,
};
pub use health::{EndpointHealthSnapshot, HealthConfig, HealthSeed, HealthStatus, HealthTracker};
pub use strategy::{build_strategy, DispatchContext, DispatchStrategy, StrategyKind};
pub use stream::DispatchStream;
pub use tester::{EndpointTestResult, EndpointTester};

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
