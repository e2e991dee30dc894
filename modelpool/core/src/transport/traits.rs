//! Transport Traits
//!
//! The dispatcher never talks to a socket. Every call to an endpoint goes
//! through a [`Transport`], which performs exactly one buffered or streaming
//! call and reports what happened. Provider wire formats, socket-level
//! retries and credential transmission all live behind this trait.
//!
//! Implementations must honour the cancellation token: when it fires, an
//! in-flight `send` returns promptly and a stream producer stops at the next
//! chunk boundary and releases its connection.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::messages::{DispatchRequest, TokenUsage};

/// Outcome of one buffered transport call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportResult {
    /// Whether the endpoint answered successfully
    pub is_success: bool,
    /// HTTP status returned by the endpoint
    pub status_code: u16,
    /// Decoded response body
    pub body: Option<serde_json::Value>,
    /// Error text when `is_success` is false
    pub error_message: Option<String>,
    /// Token usage, when reported
    pub token_usage: Option<TokenUsage>,
}

impl TransportResult {
    /// Successful result carrying a body
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        let token_usage = body.get("usage").and_then(TokenUsage::from_json);
        Self {
            is_success: true,
            status_code: 200,
            body: Some(body),
            error_message: None,
            token_usage,
        }
    }

    /// Failed result with status and message
    pub fn failed(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            status_code,
            body: None,
            error_message: Some(message.into()),
            token_usage: None,
        }
    }
}

/// Incremental events of a streaming transport call
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A content delta
    Text(String),
    /// The stream completed
    Done {
        /// Provider finish reason
        finish_reason: Option<String>,
        /// Token usage, when reported
        usage: Option<TokenUsage>,
    },
    /// The stream failed
    Error(String),
}

/// Receiver side of a streaming transport call.
///
/// The producer drops its sender when it finishes or is cancelled; a channel
/// that closes before `Done` or `Error` means the stream was truncated.
pub type TransportStream = mpsc::Receiver<TransportEvent>;

/// Performs single calls against single endpoints
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    /// Perform one buffered call.
    ///
    /// Non-success HTTP answers are reported as `Ok` with `is_success = false`;
    /// `Err` is reserved for transport-level failures (no usable answer).
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResult, TransportError>;

    /// Open one streaming call.
    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError>;
}
