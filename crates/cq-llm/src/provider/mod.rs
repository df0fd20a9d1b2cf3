//! Vendor-neutral LLM call surface.
//!
//! Each provider turns an `LlmRequest` into one HTTP call and the reply
//! into an `LlmResponse`. Errors carry the HTTP status so the retry layer
//! can classify them.

pub mod gemini;
pub mod groq;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::CallContext;
use crate::error::LlmResult;
use crate::schema::FunctionSpec;

pub use gemini::GeminiProvider;
pub use groq::GroqProvider;

/// How strongly the model is pushed toward a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model must call one of the declared functions.
    Forced,
    /// The model may answer in text or call a function.
    Any,
}

/// One completion request.
#[derive(Debug, Clone, Copy)]
pub struct LlmRequest<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub user_text: &'a str,
    pub tools: &'a [FunctionSpec],
    pub tool_choice: ToolChoice,
    pub temperature: f32,
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    ToolCall {
        name: String,
        arguments: Map<String, Value>,
    },
    Text(String),
}

impl LlmResponse {
    /// Build a tool call from a JSON object; non-objects become empty args.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::ToolCall {
            name: name.into(),
            arguments,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// A single LLM vendor.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier used in logs and failover events.
    fn name(&self) -> &str;

    /// Perform one call against `request.model`.
    async fn call(&self, ctx: &CallContext, request: &LlmRequest<'_>) -> LlmResult<LlmResponse>;
}

/// Pull a human-readable message out of a vendor error body.
///
/// Both vendors use `{"error": {"message": ...}}`; anything else is
/// returned truncated.
pub(crate) fn error_message(body: &str) -> String {
    const MAX: usize = 300;
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(msg) = json["error"]["message"].as_str()
    {
        return msg.to_string();
    }
    body.chars().take(MAX).collect()
}
