//! Scripted Transport for Tests
//!
//! [`ScriptedTransport`] stands in for real endpoints. Each endpoint id gets a
//! scripted behaviour (delay plus outcome); every call and every cancellation
//! the transport observes is recorded for later assertions.
//!
//! ```ignore
//! let transport = ScriptedTransport::new()
//!     .with_behavior("p:a", MockBehavior::fail(500))
//!     .with_behavior("p:b", MockBehavior::ok_after(20, "hello"));
//!
//! // ... dispatch ...
//!
//! assert_eq!(transport.calls(), vec!["p:a", "p:b"]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::messages::{DispatchRequest, TokenUsage};
use crate::transport::{Transport, TransportEvent, TransportResult, TransportStream};

// ============================================================================
// Behaviours
// ============================================================================

/// What a scripted endpoint does once its delay has elapsed
#[derive(Clone, Debug)]
pub(crate) enum MockOutcome {
    /// Answer with this text (streamed word by word)
    Succeed(String),
    /// Answer with a non-success status
    Fail(u16),
    /// Never answer; only cancellation ends the call
    Hang,
    /// Panic inside the transport call
    Panic,
    /// Stream these chunks, then fail mid-stream
    BreakAfter(Vec<String>),
    /// Stream these chunks, then go silent until cancelled
    StallAfter(Vec<String>),
}

/// Delay plus outcome for one endpoint
#[derive(Clone, Debug)]
pub(crate) struct MockBehavior {
    pub delay: Duration,
    pub outcome: MockOutcome,
}

impl MockBehavior {
    pub fn ok(text: &str) -> Self {
        Self::ok_after(0, text)
    }

    pub fn ok_after(delay_ms: u64, text: &str) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            outcome: MockOutcome::Succeed(text.to_string()),
        }
    }

    pub fn fail(status: u16) -> Self {
        Self::fail_after(0, status)
    }

    pub fn fail_after(delay_ms: u64, status: u16) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            outcome: MockOutcome::Fail(status),
        }
    }

    pub fn hang() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: MockOutcome::Hang,
        }
    }

    pub fn panic() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: MockOutcome::Panic,
        }
    }

    pub fn breaks_after(chunks: &[&str]) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: MockOutcome::BreakAfter(chunks.iter().map(|c| (*c).to_string()).collect()),
        }
    }

    pub fn stalls_after(chunks: &[&str]) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: MockOutcome::StallAfter(chunks.iter().map(|c| (*c).to_string()).collect()),
        }
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

pub(crate) struct ScriptedTransport {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    calls: Arc<Mutex<Vec<String>>>,
    cancellations: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    /// Every endpoint answers "ok" immediately until scripted otherwise
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            cancellations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_behavior(self, endpoint_id: &str, behavior: MockBehavior) -> Self {
        self.set(endpoint_id, behavior);
        self
    }

    pub fn set(&self, endpoint_id: &str, behavior: MockBehavior) {
        self.behaviors.lock().insert(endpoint_id.to_string(), behavior);
    }

    /// Endpoint ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, endpoint_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == endpoint_id).count()
    }

    /// Endpoint ids whose in-flight call observed a cancellation
    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().clone()
    }

    fn begin(&self, endpoint: &Endpoint) -> MockBehavior {
        self.calls.lock().push(endpoint.endpoint_id.clone());
        self.behaviors
            .lock()
            .get(&endpoint.endpoint_id)
            .cloned()
            .unwrap_or_else(|| MockBehavior::ok("ok"))
    }
}

fn reply_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 2 },
    })
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResult, TransportError> {
        let behavior = self.begin(endpoint);
        let id = endpoint.endpoint_id.clone();

        tokio::select! {
            () = cancel.cancelled() => {
                self.cancellations.lock().push(id);
                return Err(TransportError::Cancelled);
            }
            () = tokio::time::sleep(behavior.delay) => {}
        }

        match behavior.outcome {
            MockOutcome::Succeed(text) => Ok(TransportResult::ok(reply_body(&text))),
            MockOutcome::Fail(status) => Ok(TransportResult::failed(status, "scripted failure")),
            MockOutcome::BreakAfter(_) => Err(TransportError::Connection("connection reset".into())),
            MockOutcome::Hang | MockOutcome::StallAfter(_) => {
                cancel.cancelled().await;
                self.cancellations.lock().push(id);
                Err(TransportError::Cancelled)
            }
            MockOutcome::Panic => panic!("scripted transport panic"),
        }
    }

    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError> {
        let behavior = self.begin(endpoint);
        let id = endpoint.endpoint_id.clone();

        if let MockOutcome::Fail(status) = behavior.outcome {
            return Err(TransportError::Status {
                status,
                message: "scripted failure".into(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        let cancellations = Arc::clone(&self.cancellations);

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    cancellations.lock().push(id);
                    return;
                }
                () = tokio::time::sleep(behavior.delay) => {}
            }

            let (pieces, finish) = match behavior.outcome {
                MockOutcome::Succeed(text) => (
                    text.split_inclusive(' ').map(String::from).collect::<Vec<_>>(),
                    TransportEvent::Done {
                        finish_reason: Some("stop".into()),
                        usage: Some(TokenUsage {
                            input_tokens: 3,
                            output_tokens: 2,
                            total_tokens: 5,
                        }),
                    },
                ),
                MockOutcome::BreakAfter(chunks) => {
                    (chunks, TransportEvent::Error("connection reset".into()))
                }
                MockOutcome::Hang => {
                    cancel.cancelled().await;
                    cancellations.lock().push(id);
                    return;
                }
                MockOutcome::StallAfter(chunks) => {
                    for piece in chunks {
                        if tx.send(TransportEvent::Text(piece)).await.is_err() {
                            return;
                        }
                    }
                    cancel.cancelled().await;
                    cancellations.lock().push(id);
                    return;
                }
                // Dropping the sender truncates the stream
                MockOutcome::Panic | MockOutcome::Fail(_) => return,
            };

            for piece in pieces {
                if cancel.is_cancelled() {
                    cancellations.lock().push(id);
                    return;
                }
                if tx.send(TransportEvent::Text(piece)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(finish).await;
        });

        Ok(rx)
    }
}
