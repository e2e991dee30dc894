//! Endpoints
//!
//! An [`Endpoint`] is one callable backend: a single model exposed by a single
//! provider platform. Endpoints are value snapshots. A pool's endpoint list is
//! rebuilt from configuration whenever the pool is constructed and is never
//! mutated afterwards; per-endpoint state lives in the
//! [`HealthTracker`](crate::pool::health::HealthTracker).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Derive the stable endpoint id for a (platform, model) pair
#[must_use]
pub fn endpoint_id(platform_id: &str, model_id: &str) -> String {
    format!("{platform_id}:{model_id}")
}

/// One callable (platform, model) pair with routing metadata
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stable id derived from platform and model identity
    pub endpoint_id: String,
    /// Model identifier sent to the provider
    pub model_id: String,
    /// Platform record id
    pub platform_id: String,
    /// Provider family (e.g. "openai", "claude", "deepseek")
    pub platform_type: String,
    /// Human-readable platform name
    pub platform_name: String,
    /// Base URL of the provider API
    pub api_url: String,
    /// Decrypted credential. Held in memory only.
    pub api_key: String,
    /// Lower = preferred
    pub priority: i32,
    /// Output token cap applied when the request body carries none
    pub max_tokens: Option<u32>,
    /// Whether provider-side prompt caching may be requested
    pub prompt_cache_enabled: Option<bool>,
}

impl Endpoint {
    /// Create an endpoint; the id is derived from `platform_id` and `model_id`
    pub fn new(
        platform_id: impl Into<String>,
        model_id: impl Into<String>,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let platform_id = platform_id.into();
        let model_id = model_id.into();
        Self {
            endpoint_id: endpoint_id(&platform_id, &model_id),
            platform_name: platform_id.clone(),
            platform_type: String::from("openai"),
            model_id,
            platform_id,
            api_url: api_url.into(),
            api_key: api_key.into(),
            priority: 0,
            max_tokens: None,
            prompt_cache_enabled: None,
        }
    }

    /// Set routing priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set platform display name and provider family
    #[must_use]
    pub fn with_platform(
        mut self,
        platform_name: impl Into<String>,
        platform_type: impl Into<String>,
    ) -> Self {
        self.platform_name = platform_name.into();
        self.platform_type = platform_type.into();
        self
    }

    /// Set the per-endpoint output token cap
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable or disable prompt caching for this endpoint
    #[must_use]
    pub fn with_prompt_cache(mut self, enabled: bool) -> Self {
        self.prompt_cache_enabled = Some(enabled);
        self
    }

    /// Identity of this endpoint as reported in responses and stream starts
    #[must_use]
    pub fn identity(&self) -> DispatchedEndpoint {
        DispatchedEndpoint {
            endpoint_id: self.endpoint_id.clone(),
            model_id: self.model_id.clone(),
            platform_id: self.platform_id.clone(),
            platform_name: self.platform_name.clone(),
        }
    }

    /// Canonical routing order: ascending priority, ties by ascending id
    #[must_use]
    pub fn routing_order(a: &Self, b: &Self) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.endpoint_id.cmp(&b.endpoint_id))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("endpoint_id", &self.endpoint_id)
            .field("model_id", &self.model_id)
            .field("platform_id", &self.platform_id)
            .field("platform_type", &self.platform_type)
            .field("platform_name", &self.platform_name)
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("priority", &self.priority)
            .field("max_tokens", &self.max_tokens)
            .field("prompt_cache_enabled", &self.prompt_cache_enabled)
            .finish()
    }
}

/// Sort endpoints into canonical routing order
pub fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(Endpoint::routing_order);
}

/// The endpoint that actually served a dispatch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedEndpoint {
    /// Endpoint id
    pub endpoint_id: String,
    /// Model id
    pub model_id: String,
    /// Platform id
    pub platform_id: String,
    /// Platform display name
    pub platform_name: String,
}
