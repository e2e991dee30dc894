//! Endpoint Transport
//!
//! Abstraction over "perform one call against one endpoint". The pool core
//! depends only on [`Transport`]; [`OpenAiCompatTransport`] is the reference
//! HTTP implementation.

pub mod openai;
pub mod traits;

pub use openai::OpenAiCompatTransport;
pub use traits::{Transport, TransportEvent, TransportResult, TransportStream};

/// Best-effort extraction of the generated text from a provider body
///
/// Understands OpenAI chat and completion shapes and Anthropic-style content
/// blocks. Returns `None` for bodies without a textual answer.
#[must_use]
pub fn response_text(body: &serde_json::Value) -> Option<String> {
    let candidates = [
        "/choices/0/message/content",
        "/choices/0/text",
        "/content/0/text",
        "/output_text",
    ];

    candidates
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(serde_json::Value::as_str))
        .map(String::from)
}
