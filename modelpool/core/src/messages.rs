//! Dispatch Messages
//!
//! Request, response and stream-chunk types exchanged between callers and a
//! [`PoolDispatcher`](crate::pool::PoolDispatcher). Request and response
//! bodies are opaque structured data; the dispatcher never interprets them.
//!
//! # Stream Protocol
//!
//! ```text
//! Start ──> Text* ──> Done
//!   │         │
//!   └─────────┴─────> Error
//! ```
//!
//! A stream is finite and non-restartable. It ends with exactly one `Done`
//! or one `Error`. An empty pool yields a lone `Error`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::DispatchedEndpoint;
use crate::error::PoolError;
use crate::pool::strategy::StrategyKind;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Model Type
// ============================================================================

/// Coarse capability classifier for a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Text chat completion
    #[default]
    Chat,
    /// Chat with image inputs
    Vision,
    /// Image generation
    Image,
    /// Text embedding
    Embedding,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Vision => write!(f, "vision"),
            Self::Image => write!(f, "image"),
            Self::Embedding => write!(f, "embedding"),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// One logical "call a language model" request
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    /// Capability type
    pub model_type: ModelType,
    /// Opaque provider-facing body
    pub body: serde_json::Value,
    /// Budget for each individual attempt
    pub timeout: Duration,
    /// Correlation id
    pub request_id: String,
}

impl DispatchRequest {
    /// Create a request with a fresh correlation id and the default timeout
    pub fn new(model_type: ModelType, body: serde_json::Value) -> Self {
        Self {
            model_type,
            body,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Single-turn chat request carrying one user message
    pub fn chat(prompt: impl Into<String>) -> Self {
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": prompt.into() }],
        });
        Self::new(ModelType::Chat, body)
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-attempt timeout in seconds
    #[must_use]
    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    /// Use a caller-supplied correlation id. Blank ids are ignored.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        if !request_id.trim().is_empty() {
            self.request_id = request_id;
        }
        self
    }
}

// ============================================================================
// Token Usage
// ============================================================================

/// Token accounting reported by a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Parse an OpenAI-style `usage` object
    #[must_use]
    pub fn from_json(usage: &serde_json::Value) -> Option<Self> {
        let field = |name: &str| {
            usage
                .get(name)
                .and_then(serde_json::Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
        };

        let input = field("prompt_tokens").or_else(|| field("input_tokens"));
        let output = field("completion_tokens").or_else(|| field("output_tokens"));
        if input.is_none() && output.is_none() {
            return None;
        }

        let input_tokens = input.unwrap_or(0);
        let output_tokens = output.unwrap_or(0);
        Some(Self {
            input_tokens,
            output_tokens,
            total_tokens: field("total_tokens").unwrap_or(input_tokens + output_tokens),
        })
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes surfaced in responses and error chunks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The pool has no endpoints
    EmptyPool,
    /// The caller cancelled the dispatch
    Cancelled,
    /// Unexpected failure inside the dispatch pipeline
    PoolError,
    /// The contacted endpoint failed
    UpstreamError,
    /// The contacted endpoint exceeded the attempt timeout
    Timeout,
}

impl ErrorCode {
    /// Wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPool => "EMPTY_POOL",
            Self::Cancelled => "CANCELLED",
            Self::PoolError => "POOL_ERROR",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Response
// ============================================================================

/// Unified buffered response of one dispatch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// Whether an endpoint served the request successfully
    pub success: bool,
    /// HTTP-analogous status code
    pub status_code: u16,
    /// Opaque response body
    pub content: Option<serde_json::Value>,
    /// Set when `success` is false
    pub error_code: Option<ErrorCode>,
    /// Set when `success` is false
    pub error_message: Option<String>,
    /// On success, the endpoint that served the request. On failure, the
    /// last endpoint contacted; `None` when no endpoint was contacted
    /// (empty pool, cancellation, pool error).
    pub endpoint: Option<DispatchedEndpoint>,
    /// Token usage, when the provider reported it
    pub token_usage: Option<TokenUsage>,
    /// Wall-clock duration of the whole dispatch
    pub duration_ms: u64,
    /// Strategy that ran
    pub strategy: StrategyKind,
    /// Endpoints contacted during this dispatch
    pub endpoints_attempted: usize,
    /// Correlation id of the request
    pub request_id: String,
}

impl DispatchResponse {
    /// Response for a pool-level failure; no endpoint was involved
    #[must_use]
    pub fn from_pool_error(
        error: &PoolError,
        strategy: StrategyKind,
        request_id: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            status_code: error.status_code(),
            content: None,
            error_code: Some(error.code()),
            error_message: Some(error.to_string()),
            endpoint: None,
            token_usage: None,
            duration_ms: duration_millis(duration),
            strategy,
            endpoints_attempted: 0,
            request_id: request_id.into(),
        }
    }
}

/// Saturating conversion of a duration to whole milliseconds
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Stream Chunks
// ============================================================================

/// One element of a dispatch stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// The stream has been bound to an endpoint
    Start {
        /// Serving endpoint
        endpoint: DispatchedEndpoint,
        /// Correlation id
        request_id: String,
    },
    /// Content delta
    Text {
        /// Delta text
        content: String,
    },
    /// Successful end of stream
    Done {
        /// Provider finish reason
        finish_reason: Option<String>,
        /// Token usage, when reported
        usage: Option<TokenUsage>,
    },
    /// Terminal failure
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl StreamChunk {
    /// Whether this chunk ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Terminal error chunk for a pool-level failure
    #[must_use]
    pub fn from_pool_error(error: &PoolError) -> Self {
        Self::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = DispatchRequest::chat("hello");
        assert_eq!(request.model_type, ModelType::Chat);
        assert_eq!(request.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(uuid::Uuid::parse_str(&request.request_id).is_ok());
        assert_eq!(request.body["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_blank_request_id_keeps_generated() {
        let request = DispatchRequest::chat("hi").with_request_id("  ");
        assert!(!request.request_id.trim().is_empty());

        let request = DispatchRequest::chat("hi").with_request_id("corr-1");
        assert_eq!(request.request_id, "corr-1");
    }

    #[test]
    fn test_token_usage_from_json() {
        let usage = serde_json::json!({
            "prompt_tokens": 12,
            "completion_tokens": 30,
            "total_tokens": 42
        });
        let parsed = TokenUsage::from_json(&usage).unwrap();
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.output_tokens, 30);
        assert_eq!(parsed.total_tokens, 42);

        let anthropic_style = serde_json::json!({ "input_tokens": 5, "output_tokens": 7 });
        assert_eq!(TokenUsage::from_json(&anthropic_style).unwrap().total_tokens, 12);

        assert!(TokenUsage::from_json(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::EmptyPool).unwrap();
        assert_eq!(json, "\"EMPTY_POOL\"");
        assert_eq!(ErrorCode::UpstreamError.to_string(), "UPSTREAM_ERROR");
    }

    #[test]
    fn test_chunk_terminality() {
        assert!(!StreamChunk::Text {
            content: "a".into()
        }
        .is_terminal());
        assert!(StreamChunk::Done {
            finish_reason: None,
            usage: None
        }
        .is_terminal());
        assert!(StreamChunk::from_pool_error(&PoolError::EmptyPool).is_terminal());
    }
}
