//! OpenAI-Compatible HTTP Transport
//!
//! Reference [`Transport`] for providers exposing the OpenAI REST surface
//! (OpenAI, DeepSeek, Qwen/DashScope compatible mode, vLLM, Ollama's `/v1`,
//! most aggregators).
//!
//! | Model type | Path |
//! |---|---|
//! | chat, vision | `{api_url}/chat/completions` |
//! | embedding | `{api_url}/embeddings` |
//! | image | `{api_url}/images/generations` |
//!
//! Streaming uses server-sent events: `data: {json}` lines terminated by
//! `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::{Transport, TransportEvent, TransportResult, TransportStream};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::messages::{DispatchRequest, ModelType, TokenUsage};

const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Longest error body kept in a failed result
const MAX_ERROR_TEXT: usize = 1000;

/// HTTP transport for OpenAI-compatible endpoints
#[derive(Clone)]
pub struct OpenAiCompatTransport {
    http_client: reqwest::Client,
}

impl OpenAiCompatTransport {
    /// Create a transport with its own connection pool
    pub fn new() -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http_client })
    }

    /// Create a transport around an existing client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    fn url_for(endpoint: &Endpoint, model_type: ModelType) -> String {
        let base = endpoint.api_url.trim_end_matches('/');
        let path = match model_type {
            ModelType::Chat | ModelType::Vision => "chat/completions",
            ModelType::Embedding => "embeddings",
            ModelType::Image => "images/generations",
        };
        format!("{base}/{path}")
    }

    /// Provider-facing body: the opaque request body plus model binding and
    /// per-endpoint overrides
    fn build_body(
        endpoint: &Endpoint,
        request: &DispatchRequest,
        stream: bool,
    ) -> Result<serde_json::Value, TransportError> {
        let mut body = request.body.clone();
        let Some(object) = body.as_object_mut() else {
            return Err(TransportError::InvalidRequest(
                "request body must be a JSON object".to_string(),
            ));
        };

        object.insert(
            "model".to_string(),
            serde_json::Value::String(endpoint.model_id.clone()),
        );

        let is_chat = matches!(request.model_type, ModelType::Chat | ModelType::Vision);
        if is_chat {
            if let Some(max_tokens) = endpoint.max_tokens {
                object
                    .entry("max_tokens")
                    .or_insert_with(|| serde_json::json!(max_tokens));
            }
        }

        if stream {
            object.insert("stream".to_string(), serde_json::Value::Bool(true));
            object
                .entry("stream_options")
                .or_insert_with(|| serde_json::json!({ "include_usage": true }));
        }

        Ok(body)
    }

    async fn post_json(
        &self,
        url: &str,
        endpoint: &Endpoint,
        body: &serde_json::Value,
    ) -> Result<TransportResult, TransportError> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&endpoint.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Ok(TransportResult::failed(status.as_u16(), error_text(&text)));
        }

        let data: serde_json::Value = response.json().await?;
        Ok(TransportResult::ok(data))
    }
}

/// Pull a readable message out of an error body
fn error_text(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("message"))
            .or_else(|| json.get("error"))
            .and_then(serde_json::Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    body.chars().take(MAX_ERROR_TEXT).collect()
}

#[async_trait]
impl Transport for OpenAiCompatTransport {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResult, TransportError> {
        let url = Self::url_for(endpoint, request.model_type);
        let body = Self::build_body(endpoint, request, false)?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.post_json(&url, endpoint, &body) => result,
        }
    }

    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError> {
        let url = Self::url_for(endpoint, request.model_type);
        let body = Self::build_body(endpoint, request, true)?;

        let send = self
            .http_client
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_text(&text),
            });
        }

        let mut stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut parser = SseParser::default();

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        for event in parser.push(&bytes) {
                            let terminal = !matches!(event, TransportEvent::Text(_));
                            if tx.send(event).await.is_err() || terminal {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        if let Some(event) = parser.finish() {
                            let _ = tx.send(event).await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ============================================================================
// SSE Parsing
// ============================================================================

/// Incremental parser for OpenAI-style server-sent events
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    saw_content: bool,
    finished: bool,
}

impl SseParser {
    /// Feed raw bytes, returning every complete event
    fn push(&mut self, bytes: &[u8]) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.parse_line(line.trim()) {
                let terminal = !matches!(event, TransportEvent::Text(_));
                events.push(event);
                if terminal {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }

        events
    }

    fn parse_line(&mut self, line: &str) -> Option<TransportEvent> {
        let payload = line.strip_prefix("data:")?.trim();

        if payload == "[DONE]" {
            return Some(self.done_event());
        }

        let data: serde_json::Value = serde_json::from_str(payload).ok()?;

        if let Some(error) = data.get("error") {
            let message = error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| error.to_string(), String::from);
            return Some(TransportEvent::Error(message));
        }

        if let Some(usage) = data.get("usage").and_then(TokenUsage::from_json) {
            self.usage = Some(usage);
        }

        let choice = data.pointer("/choices/0")?;
        if let Some(reason) = choice
            .get("finish_reason")
            .and_then(serde_json::Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = choice
            .pointer("/delta/content")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())?;
        self.saw_content = true;
        Some(TransportEvent::Text(delta.to_string()))
    }

    fn done_event(&mut self) -> TransportEvent {
        TransportEvent::Done {
            finish_reason: self.finish_reason.take(),
            usage: self.usage.take(),
        }
    }

    /// Terminal event for a body that ended without `[DONE]`
    fn finish(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if self.saw_content || self.finish_reason.is_some() {
            Some(self.done_event())
        } else {
            Some(TransportEvent::Error(
                "stream ended before any data".to_string(),
            ))
        }
    }
}
