//! Natural-language intent parsing via forced function calling.

use std::sync::Arc;

use cq_protocol::ParseResult;
use serde_json::Value;

use crate::context::CallContext;
use crate::error::{LlmError, LlmResult};
use crate::fallback::FallbackOrchestrator;
use crate::provider::LlmResponse;
use crate::schema;

/// Instructions sent with every intent call. The function declarations
/// carry the per-intent detail.
pub const SYSTEM_PROMPT: &str = "\
You are the message router of a university campus assistant on LINE. \
Users write in Traditional Chinese or English and ask about courses, student IDs, \
department codes, office contacts, academic programs (學程) and their own usage quota.

Always answer by calling exactly one of the provided functions.
- Pick the lookup function that matches what the user wants and fill its parameters \
with the words the user actually used. Do not translate names.
- Course titles and teacher names go to course_search; descriptions of what the user \
wants to learn go to course_smart.
- A course number such as 1131U0001 goes to course_uid; an 8 or 9 digit number goes to \
id_student_id.
- Greetings, thanks, small talk and questions the lookups cannot answer go to \
direct_reply with a short, friendly reply in the user's language.
- If the user asks what you can do, call help.";

/// Map a provider response onto a module intent.
///
/// Only declared functions are accepted. String arguments pass through,
/// numbers and booleans are stringified, undeclared keys and nested
/// values are dropped.
pub fn to_parse_result(response: LlmResponse) -> LlmResult<ParseResult> {
    let (name, arguments) = match response {
        LlmResponse::ToolCall { name, arguments } => (name, arguments),
        LlmResponse::Text(text) => {
            return Err(LlmError::Schema(format!(
                "expected a function call, got text: {}",
                text.chars().take(80).collect::<String>()
            )));
        }
    };

    let spec = schema::lookup(&name)
        .ok_or_else(|| LlmError::Schema(format!("unknown function {name}")))?;

    let mut result = ParseResult::new(spec.module, spec.intent, spec.name);
    for (key, value) in arguments {
        if spec.param(&key).is_none() {
            tracing::debug!(function = %name, key = %key, "dropping undeclared argument");
            continue;
        }
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                tracing::debug!(function = %name, key = %key, "dropping non-scalar argument");
                continue;
            }
        };
        result.params.insert(key, value);
    }
    Ok(result)
}

/// Turns free text into a `ParseResult` through the provider chain.
#[derive(Clone)]
pub struct IntentParser {
    orchestrator: Arc<FallbackOrchestrator>,
}

impl IntentParser {
    pub fn new(orchestrator: Arc<FallbackOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn parse(&self, ctx: &CallContext, text: &str) -> LlmResult<ParseResult> {
        let result = self.orchestrator.parse_intent(ctx, text.trim()).await?;
        tracing::info!(
            function = %result.function_name,
            module = %result.module,
            intent = %result.intent,
            params = result.params.len(),
            "intent parsed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ProviderAdapter;
    use crate::error::ErrorClass;
    use crate::mock::ScriptedProvider;
    use crate::retry::{Retrier, RetryPolicy};
    use serde_json::json;

    #[test]
    fn maps_function_to_module_intent() {
        let result = to_parse_result(LlmResponse::tool_call(
            "program_courses",
            json!({ "program_name": "人工智慧學程" }),
        ))
        .unwrap();
        assert_eq!(result.module, "program");
        assert_eq!(result.intent, "courses");
        assert_eq!(result.function_name, "program_courses");
        assert_eq!(result.param("program_name"), Some("人工智慧學程"));
    }

    #[test]
    fn scalars_are_stringified() {
        let result = to_parse_result(LlmResponse::tool_call(
            "id_student_id",
            json!({ "student_id": 412345678 }),
        ))
        .unwrap();
        assert_eq!(result.param("student_id"), Some("412345678"));
    }

    #[test]
    fn undeclared_and_nested_args_are_dropped() {
        let result = to_parse_result(LlmResponse::tool_call(
            "course_search",
            json!({ "keyword": "微積分", "semester": "113-1", "extra": { "a": 1 } }),
        ))
        .unwrap();
        assert_eq!(result.params.len(), 1);
        assert_eq!(result.param("keyword"), Some("微積分"));
    }

    #[test]
    fn unknown_function_is_permanent() {
        let err = to_parse_result(LlmResponse::tool_call("weather", json!({}))).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn free_text_is_a_schema_violation() {
        let err = to_parse_result(LlmResponse::text("Hi there!")).unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
    }

    #[test]
    fn direct_reply_keeps_message() {
        let result = to_parse_result(LlmResponse::tool_call(
            "direct_reply",
            json!({ "message": "不客氣！" }),
        ))
        .unwrap();
        assert!(result.is_direct_reply());
        assert_eq!(result.param("message"), Some("不客氣！"));
    }

    #[tokio::test]
    async fn parser_trims_input() {
        let provider = Arc::new(
            ScriptedProvider::new("gemini").then(Ok(LlmResponse::tool_call("help", json!({})))),
        );
        let adapter = ProviderAdapter::new(provider.clone(), Retrier::seeded(RetryPolicy::default(), 1))
            .with_intent_models(["m"]);
        let parser = IntentParser::new(Arc::new(FallbackOrchestrator::new(adapter)));

        let result = parser.parse(&CallContext::new(), "  what can you do  ").await.unwrap();
        assert_eq!(result.module, "help");
        assert_eq!(provider.calls()[0].user_text, "what can you do");
    }
}
