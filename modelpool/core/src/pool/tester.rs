//! Endpoint Probing
//!
//! [`EndpointTester`] sends one fixed, low-cost probe to one endpoint and
//! reports latency, status and a short preview of the answer. It holds no
//! state and records nothing itself; [`PoolDispatcher::test_endpoints`]
//! feeds its results into the pool's health tracker.
//!
//! [`PoolDispatcher::test_endpoints`]: super::dispatcher::PoolDispatcher::test_endpoints

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::pool::health::HealthStatus;
use crate::messages::{duration_millis, DispatchRequest, ModelType, TokenUsage};
use crate::transport::{response_text, Transport};

/// Prompt of the probe request
pub const PROBE_PROMPT: &str = "Reply with OK.";

/// Output bound of the probe request
pub const PROBE_MAX_TOKENS: u32 = 16;

/// Timeout of the probe request
pub const PROBE_TIMEOUT_SECS: u64 = 30;

/// Longest response preview kept in a result, in characters
pub const PREVIEW_MAX_CHARS: usize = 500;

/// Outcome of probing one endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointTestResult {
    /// Probed endpoint
    pub endpoint_id: String,
    /// Model id of the endpoint
    pub model_id: String,
    /// Platform display name
    pub platform_name: String,
    /// Whether the probe succeeded
    pub success: bool,
    /// HTTP-analogous status (504 on timeout)
    pub status_code: u16,
    /// Wall-clock latency of the probe
    pub latency_ms: u64,
    /// Start of the answer, at most [`PREVIEW_MAX_CHARS`] characters
    pub response_preview: Option<String>,
    /// Failure reason
    pub error_message: Option<String>,
    /// Token usage, when reported
    pub token_usage: Option<TokenUsage>,
    /// Health of the endpoint once the probe outcome is recorded
    #[serde(default)]
    pub health_status: HealthStatus,
    /// When the probe finished
    pub tested_at: DateTime<Utc>,
}

/// Stateless prober
#[derive(Clone)]
pub struct EndpointTester {
    transport: Arc<dyn Transport>,
}

impl EndpointTester {
    /// Probe through the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The fixed probe request
    #[must_use]
    pub fn probe_request() -> DispatchRequest {
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": PROBE_PROMPT }],
            "max_tokens": PROBE_MAX_TOKENS,
        });
        DispatchRequest::new(ModelType::Chat, body)
            .with_timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
    }

    /// Send `request` (the probe when `None`) to one endpoint
    pub async fn test(
        &self,
        endpoint: &Endpoint,
        request: Option<&DispatchRequest>,
    ) -> EndpointTestResult {
        let probe;
        let request = match request {
            Some(request) => request,
            None => {
                probe = Self::probe_request();
                &probe
            }
        };

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(
            request.timeout,
            self.transport.send(endpoint, request, cancel.clone()),
        )
        .await;
        let latency_ms = duration_millis(started.elapsed());

        let mut result = EndpointTestResult {
            endpoint_id: endpoint.endpoint_id.clone(),
            model_id: endpoint.model_id.clone(),
            platform_name: endpoint.platform_name.clone(),
            success: false,
            status_code: 0,
            latency_ms,
            response_preview: None,
            error_message: None,
            token_usage: None,
            health_status: HealthStatus::default(),
            tested_at: Utc::now(),
        };

        match outcome {
            Err(_elapsed) => {
                cancel.cancel();
                result.status_code = 504;
                result.error_message = Some(format!("Probe timed out after {:?}", request.timeout));
            }
            Ok(Err(error)) => {
                result.status_code = error.status_code();
                result.error_message = Some(error.to_string());
            }
            Ok(Ok(response)) => {
                result.success = response.is_success;
                result.status_code = response.status_code;
                result.error_message = response.error_message;
                result.token_usage = response.token_usage;
                result.response_preview = response
                    .body
                    .as_ref()
                    .map(|body| response_text(body).unwrap_or_else(|| body.to_string()))
                    .map(|text| preview(&text));
            }
        }

        tracing::info!(
            endpoint = %result.endpoint_id,
            success = result.success,
            status_code = result.status_code,
            latency_ms,
            "Endpoint probed"
        );
        result
    }
}

impl std::fmt::Debug for EndpointTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointTester")
            .field("transport", &self.transport.name())
            .finish()
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}
