//! Google Gemini `generateContent` provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ToolChoice, error_message};
use crate::context::CallContext;
use crate::error::{LlmError, LlmResult};
use crate::schema::TypeCase;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const NAME: &str = "gemini";

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Gemini REST client.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn body(request: &LlmRequest<'_>) -> Value {
        let mut body = json!({
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.user_text }] }],
            "generationConfig": { "temperature": request.temperature },
        });

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|f| {
                    let mut decl = json!({ "name": f.name, "description": f.description });
                    // Gemini rejects OBJECT schemas with no properties.
                    if !f.params.is_empty() {
                        decl["parameters"] = f.parameters_schema(TypeCase::Upper);
                    }
                    decl
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);

            let mode = match request.tool_choice {
                ToolChoice::Forced => "ANY",
                ToolChoice::Any => "AUTO",
            };
            body["toolConfig"] = json!({ "functionCallingConfig": { "mode": mode } });
        }

        body
    }

    fn interpret(response: GenerateResponse) -> LlmResult<LlmResponse> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Err(LlmError::malformed(NAME, "no candidates in response"));
        };
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

        let mut text = String::new();
        for part in parts {
            if let Some(call) = part.function_call {
                return Ok(LlmResponse::tool_call(call.name, call.args));
            }
            if let Some(t) = part.text {
                text.push_str(&t);
            }
        }

        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(LlmError::malformed(
                NAME,
                format!("empty candidate (finish reason {reason})"),
            ));
        }
        Ok(LlmResponse::Text(text))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn call(&self, ctx: &CallContext, request: &LlmRequest<'_>) -> LlmResult<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let timeout = ctx
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(timeout)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::http(NAME, status.as_u16(), error_message(&body)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::malformed(NAME, e.to_string()))?;
        Self::interpret(parsed)
    }
}
