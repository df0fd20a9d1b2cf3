//! Groq OpenAI-compatible chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ToolChoice, error_message};
use crate::context::CallContext;
use crate::error::{LlmError, LlmResult};
use crate::schema::TypeCase;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com";
const NAME: &str = "groq";

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Deserialize)]
struct ToolFunction {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

/// Groq REST client.
pub struct GroqProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GroqProvider {
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
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_text },
            ],
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters_schema(TypeCase::Lower),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Forced => json!("required"),
                ToolChoice::Any => json!("auto"),
            };
        }

        body
    }

    fn interpret(response: ChatResponse) -> LlmResult<LlmResponse> {
        let Some(choice) = response.choices.into_iter().next() else {
            return Err(LlmError::malformed(NAME, "no choices in response"));
        };
        let message = choice.message;

        if let Some(call) = message.tool_calls.into_iter().next() {
            let raw = call.function.arguments.trim();
            let arguments: Value = if raw.is_empty() {
                json!({})
            } else {
                serde_json::from_str(raw).map_err(|e| {
                    LlmError::malformed(NAME, format!("tool arguments are not JSON: {e}"))
                })?
            };
            return Ok(LlmResponse::tool_call(call.function.name, arguments));
        }

        match message.content {
            Some(text) if !text.trim().is_empty() => Ok(LlmResponse::Text(text)),
            _ => Err(LlmError::malformed(NAME, "empty message")),
        }
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn call(&self, ctx: &CallContext, request: &LlmRequest<'_>) -> LlmResult<LlmResponse> {
        let url = format!("{}/openai/v1/chat/completions", self.base_url);
        let timeout = ctx
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::malformed(NAME, e.to_string()))?;
        Self::interpret(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::schema::FUNCTIONS;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GroqProvider {
        GroqProvider::new("gsk-test", server.uri(), Duration::from_secs(2))
    }

    fn request() -> LlmRequest<'static> {
        LlmRequest {
            model: "llama-3.3-70b-versatile",
            system_prompt: "You route campus questions.",
            user_text: "學號 412345678",
            tools: FUNCTIONS,
            tool_choice: ToolChoice::Forced,
            temperature: 0.0,
        }
    }

    async fn mount(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn tool_call_arguments_are_decoded() {
        let server = MockServer::start().await;
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "id_student_id", "arguments": "{\"student_id\":\"412345678\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        mount(&server, ResponseTemplate::new(200).set_body_json(body)).await;

        let resp = provider_for(&server)
            .call(&CallContext::new(), &request())
            .await
            .unwrap();
        assert_eq!(
            resp,
            LlmResponse::tool_call("id_student_id", json!({ "student_id": "412345678" }))
        );
    }

    #[tokio::test]
    async fn required_tool_choice_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "tool_choice": "required" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "hi" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        provider_for(&server)
            .call(&CallContext::new(), &request())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn garbage_arguments_are_malformed() {
        let server = MockServer::start().await;
        let body = json!({
            "choices": [{ "message": { "tool_calls": [{
                "function": { "name": "course_search", "arguments": "{keyword: oops" }
            }]}}]
        });
        mount(&server, ResponseTemplate::new(200).set_body_json(body)).await;

        let err = provider_for(&server)
            .call(&CallContext::new(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Malformed { .. }));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        let body = json!({ "error": { "message": "Service Unavailable", "type": "internal_server_error" } });
        mount(&server, ResponseTemplate::new(503).set_body_json(body)).await;

        let err = provider_for(&server)
            .call(&CallContext::new(), &request())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn bad_request_is_permanent() {
        let server = MockServer::start().await;
        let body = json!({ "error": { "message": "tool_use_failed" } });
        mount(&server, ResponseTemplate::new(400).set_body_json(body)).await;

        let err = provider_for(&server)
            .call(&CallContext::new(), &request())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(!err.warrants_failover());
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Nothing listens on port 1.
        let provider = GroqProvider::new("gsk-test", "http://127.0.0.1:1", Duration::from_secs(1));
        let err = provider
            .call(&CallContext::new(), &request())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
