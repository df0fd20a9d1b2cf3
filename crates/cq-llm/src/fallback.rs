//! Primary/secondary provider failover.
//!
//! The secondary is only tried when the primary's failure says the primary
//! cannot serve right now: transient exhaustion, or an auth rejection (HTTP
//! 401/403). A bad request or an off-schema answer would fail the same way
//! on the secondary, so it is returned as is.

use std::sync::Arc;

use cq_protocol::ParseResult;
use serde::Serialize;

use crate::adapter::{OperationKind, ProviderAdapter};
use crate::context::CallContext;
use crate::error::{ErrorClass, LlmError, LlmResult};

/// One switch from the primary to the secondary provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverEvent {
    pub from: String,
    pub to: String,
    pub operation: OperationKind,
    /// Class of the primary's terminal error.
    pub class: ErrorClass,
    pub status: Option<u16>,
}

/// Receives failover events (telemetry, tests).
pub trait FailoverObserver: Send + Sync {
    fn on_failover(&self, event: &FailoverEvent);
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailoverObserver;

impl FailoverObserver for LogFailoverObserver {
    fn on_failover(&self, event: &FailoverEvent) {
        tracing::warn!(
            from = %event.from,
            to = %event.to,
            operation = %event.operation,
            class = %event.class,
            status = ?event.status,
            "llm provider failover"
        );
    }
}

pub struct FallbackOrchestrator {
    primary: ProviderAdapter,
    secondary: Option<ProviderAdapter>,
    observer: Arc<dyn FailoverObserver>,
}

impl FallbackOrchestrator {
    pub fn new(primary: ProviderAdapter) -> Self {
        Self {
            primary,
            secondary: None,
            observer: Arc::new(LogFailoverObserver),
        }
    }

    pub fn with_secondary(mut self, secondary: ProviderAdapter) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn FailoverObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn primary(&self) -> &ProviderAdapter {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&ProviderAdapter> {
        self.secondary.as_ref()
    }

    pub async fn parse_intent(&self, ctx: &CallContext, text: &str) -> LlmResult<ParseResult> {
        let err = match self.primary.parse_intent(ctx, text).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        match self.failover_target(OperationKind::Intent, &err) {
            Some(secondary) => secondary
                .parse_intent(ctx, text)
                .await
                .map_err(|second| self.both_failed(OperationKind::Intent, err, &second)),
            None => Err(err),
        }
    }

    pub async fn expand_query(&self, ctx: &CallContext, text: &str) -> LlmResult<String> {
        let err = match self.primary.expand_query(ctx, text).await {
            Ok(expanded) => return Ok(expanded),
            Err(err) => err,
        };
        match self.failover_target(OperationKind::Expander, &err) {
            Some(secondary) => secondary
                .expand_query(ctx, text)
                .await
                .map_err(|second| self.both_failed(OperationKind::Expander, err, &second)),
            None => Err(err),
        }
    }

    /// The secondary, if this primary failure warrants switching to it.
    /// Emits the failover event.
    fn failover_target(&self, operation: OperationKind, err: &LlmError) -> Option<&ProviderAdapter> {
        let secondary = self.secondary.as_ref()?;
        if !err.warrants_failover() {
            return None;
        }
        self.observer.on_failover(&FailoverEvent {
            from: self.primary.name().to_string(),
            to: secondary.name().to_string(),
            operation,
            class: err.class(),
            status: err.status(),
        });
        Some(secondary)
    }

    fn both_failed(&self, operation: OperationKind, primary: LlmError, secondary: &LlmError) -> LlmError {
        tracing::warn!(
            operation = %operation,
            primary_error = %primary,
            secondary_error = %secondary,
            "all llm providers failed"
        );
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;
    use crate::provider::LlmResponse;
    use crate::retry::{Retrier, RetryPolicy};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<FailoverEvent>>);

    impl FailoverObserver for Recorder {
        fn on_failover(&self, event: &FailoverEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn adapter(provider: &Arc<ScriptedProvider>) -> ProviderAdapter {
        let retrier = Retrier::seeded(
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(20)),
            5,
        );
        ProviderAdapter::new(provider.clone(), retrier)
            .with_intent_models(["m"])
            .with_expander_models(["m"])
    }

    fn pair(
        primary: ScriptedProvider,
        secondary: ScriptedProvider,
    ) -> (FallbackOrchestrator, Arc<ScriptedProvider>, Arc<ScriptedProvider>, Arc<Recorder>) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let recorder = Arc::new(Recorder::default());
        let orchestrator = FallbackOrchestrator::new(adapter(&primary))
            .with_secondary(adapter(&secondary))
            .with_observer(recorder.clone());
        (orchestrator, primary, secondary, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_fails_over() {
        let (orch, primary, secondary, recorder) = pair(
            ScriptedProvider::new("gemini").always(Err(LlmError::http("gemini", 429, "quota"))),
            ScriptedProvider::new("groq")
                .then(Ok(LlmResponse::tool_call("program_list", json!({})))),
        );

        let result = orch.parse_intent(&CallContext::new(), "學程列表").await.unwrap();
        assert_eq!(result.module, "program");
        assert_eq!(result.intent, "list");
        assert_eq!(primary.call_count(), 2);
        assert_eq!(secondary.call_count(), 1);

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, "gemini");
        assert_eq!(events[0].to, "groq");
        assert_eq!(events[0].operation, OperationKind::Intent);
        assert_eq!(events[0].class, ErrorClass::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_key_fails_over() {
        let (orch, primary, _, recorder) = pair(
            ScriptedProvider::new("gemini").then(Err(LlmError::http("gemini", 403, "key revoked"))),
            ScriptedProvider::new("groq").then(Ok(LlmResponse::text("AI 人工智慧"))),
        );

        let out = orch.expand_query(&CallContext::new(), "AI").await.unwrap();
        assert_eq!(out, "AI 人工智慧");
        assert_eq!(primary.call_count(), 1);
        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events[0].class, ErrorClass::Permanent);
        assert_eq!(events[0].status, Some(403));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_does_not_fail_over() {
        let (orch, _, secondary, recorder) = pair(
            ScriptedProvider::new("gemini").then(Err(LlmError::http("gemini", 400, "bad"))),
            ScriptedProvider::new("groq"),
        );

        let err = orch.parse_intent(&CallContext::new(), "hi").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(secondary.call_count(), 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn both_failing_returns_primary_error() {
        let (orch, _, _, _) = pair(
            ScriptedProvider::new("gemini").always(Err(LlmError::http("gemini", 503, "down"))),
            ScriptedProvider::new("groq").always(Err(LlmError::http("groq", 500, "oops"))),
        );

        let err = orch.parse_intent(&CallContext::new(), "hi").await.unwrap_err();
        match err {
            LlmError::Http { provider, status, .. } => {
                assert_eq!(provider, "gemini");
                assert_eq!(status, 503);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_secondary_returns_primary_error() {
        let primary = Arc::new(
            ScriptedProvider::new("groq").always(Err(LlmError::http("groq", 429, "slow down"))),
        );
        let orch = FallbackOrchestrator::new(adapter(&primary));

        let err = orch.expand_query(&CallContext::new(), "AI").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn canceled_primary_does_not_fail_over() {
        let (orch, primary, secondary, _) = pair(
            ScriptedProvider::new("gemini"),
            ScriptedProvider::new("groq"),
        );
        let ctx = CallContext::new();
        ctx.cancel();

        let err = orch.parse_intent(&ctx, "hi").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Canceled);
        assert_eq!(primary.call_count(), 0);
        assert_eq!(secondary.call_count(), 0);
    }
}
