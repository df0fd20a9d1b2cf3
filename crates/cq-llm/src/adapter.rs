//! One provider plus its model chains.
//!
//! A call walks the chain for its operation kind. Each model gets the full
//! retry budget; only transient exhaustion moves on to the next model. Any
//! other failure ends the call for this provider.

use std::sync::Arc;

use cq_protocol::ParseResult;
use serde::Serialize;

use crate::context::CallContext;
use crate::error::{ErrorClass, LlmError, LlmResult};
use crate::expander;
use crate::intent;
use crate::provider::{LlmProvider, LlmRequest, LlmResponse, ToolChoice};
use crate::retry::Retrier;
use crate::schema::{FUNCTIONS, FunctionSpec};

/// Which model chain a call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Intent,
    Expander,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Expander => "expander",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt, tools and sampling settings for a single completion.
struct Prompt<'a> {
    system: &'a str,
    user: &'a str,
    tools: &'a [FunctionSpec],
    tool_choice: ToolChoice,
    temperature: f32,
}

pub struct ProviderAdapter {
    provider: Arc<dyn LlmProvider>,
    intent_models: Vec<String>,
    expander_models: Vec<String>,
    retrier: Retrier,
}

impl ProviderAdapter {
    pub fn new(provider: Arc<dyn LlmProvider>, retrier: Retrier) -> Self {
        Self {
            provider,
            intent_models: Vec::new(),
            expander_models: Vec::new(),
            retrier,
        }
    }

    pub fn with_intent_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expander_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expander_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn models(&self, kind: OperationKind) -> &[String] {
        match kind {
            OperationKind::Intent => &self.intent_models,
            OperationKind::Expander => &self.expander_models,
        }
    }

    /// Forced function call, mapped onto a module intent.
    pub async fn parse_intent(&self, ctx: &CallContext, text: &str) -> LlmResult<ParseResult> {
        let prompt = Prompt {
            system: intent::SYSTEM_PROMPT,
            user: text,
            tools: FUNCTIONS,
            tool_choice: ToolChoice::Forced,
            temperature: 0.0,
        };
        let response = self.complete(ctx, OperationKind::Intent, &prompt).await?;
        intent::to_parse_result(response)
    }

    /// Free-text completion returning the raw expansion.
    pub async fn expand_query(&self, ctx: &CallContext, text: &str) -> LlmResult<String> {
        let prompt = Prompt {
            system: expander::SYSTEM_PROMPT,
            user: text,
            tools: &[],
            tool_choice: ToolChoice::Any,
            temperature: 0.3,
        };
        match self.complete(ctx, OperationKind::Expander, &prompt).await? {
            LlmResponse::Text(text) => Ok(text),
            LlmResponse::ToolCall { name, .. } => Err(LlmError::Schema(format!(
                "expander expected text, got call to {name}"
            ))),
        }
    }

    async fn complete(
        &self,
        ctx: &CallContext,
        kind: OperationKind,
        prompt: &Prompt<'_>,
    ) -> LlmResult<LlmResponse> {
        let chain = self.models(kind);
        let mut last_err = None;

        for model in chain {
            let request = LlmRequest {
                model,
                system_prompt: prompt.system,
                user_text: prompt.user,
                tools: prompt.tools,
                tool_choice: prompt.tool_choice,
                temperature: prompt.temperature,
            };
            let provider = &self.provider;
            let request = &request;
            let label = format!("{}/{}", self.name(), model);

            match self
                .retrier
                .run(ctx, &label, move |_| provider.call(ctx, request))
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if err.class() == ErrorClass::Transient => {
                    tracing::warn!(
                        provider = %self.name(),
                        model = %model,
                        operation = %kind,
                        error = %err,
                        "model exhausted retries, trying next model"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            LlmError::NotConfigured(format!("{} {}", self.name(), kind))
        }))
    }
}
