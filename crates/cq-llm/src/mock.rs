//! Scripted LLM provider for tests without network access.
//!
//! Replays queued results in order and records every call for assertion.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{LlmError, LlmResult};
use crate::provider::{LlmProvider, LlmRequest, LlmResponse};

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub model: String,
    pub user_text: String,
}

/// Mock implementation of `LlmProvider`.
///
/// Results are popped from the script; once it runs dry the repeating
/// result (if any) is returned forever, otherwise a malformed error.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<LlmResult<LlmResponse>>>,
    repeat: Mutex<Option<LlmResult<LlmResponse>>>,
    delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            repeat: Mutex::new(None),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one result.
    pub fn then(self, result: LlmResult<LlmResponse>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Result returned once the script is exhausted.
    pub fn always(self, result: LlmResult<LlmResponse>) -> Self {
        *self.repeat.lock().unwrap() = Some(result);
        self
    }

    /// Simulated latency applied before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, result: LlmResult<LlmResponse>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Models in the order they were called.
    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &CallContext, request: &LlmRequest<'_>) -> LlmResult<LlmResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: request.model.to_string(),
            user_text: request.user_text.to_string(),
        });

        if !self.delay.is_zero() {
            ctx.sleep(self.delay).await?;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self
                .repeat
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(LlmError::malformed(&self.name, "script exhausted"))),
        }
    }
}
