//! Shared test harness for E2E tests.
//!
//! Wires the real modules, limiters, dispatcher and router together with
//! scripted LLM providers and a recording reply sink, so every test drives
//! the same code path as a LINE webhook delivery.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use cq_bot::catalog::DataSources;
use cq_bot::config::BotConfig;
use cq_bot::dispatcher::Dispatcher;
use cq_bot::mock::RecordingSink;
use cq_bot::modules::standard_modules;
use cq_bot::routes::build_router;
use cq_bot::state::AppState;
use cq_bot::telemetry::{Telemetry, TelemetrySnapshot};
use cq_llm::{
    ExpanderConfig, FailoverObserver, FallbackOrchestrator, IntentParser, ProviderAdapter,
    QueryExpander, Retrier, RetryPolicy, ScriptedProvider,
};
use cq_protocol::Reply;
use cq_ratelimit::KeyedLimiter;

pub const INTENT_MODEL: &str = "intent-model";
pub const EXPANDER_MODEL: &str = "expander-model";

const SEND_WAIT: Duration = Duration::from_secs(2);

/// Bot wired to scripted providers: `primary` (gemini) fails over to
/// `secondary` (groq).
pub struct TestHarness {
    pub state: AppState,
    pub router: Router,
    pub sink: Arc<RecordingSink>,
    pub primary: Arc<ScriptedProvider>,
    pub secondary: Arc<ScriptedProvider>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(&BotConfig::default())
    }

    /// Limiters follow `config`; providers are always scripted.
    pub fn with_config(config: &BotConfig) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let primary = Arc::new(ScriptedProvider::new("gemini"));
        let secondary = Arc::new(ScriptedProvider::new("groq"));

        let telemetry = Arc::new(Telemetry::new());
        let user_limiter = Arc::new(KeyedLimiter::new("webhook", config.user_limiter.clone()));
        let llm_limiter = Arc::new(KeyedLimiter::new("llm", config.llm_limiter.clone()));

        let observer: Arc<dyn FailoverObserver> = telemetry.clone();
        let orchestrator = Arc::new(
            FallbackOrchestrator::new(adapter(&primary, 7))
                .with_secondary(adapter(&secondary, 11))
                .with_observer(observer),
        );
        let expander = Arc::new(QueryExpander::new(
            orchestrator.clone(),
            ExpanderConfig::default(),
        ));

        let modules = standard_modules(
            &DataSources::sample(),
            user_limiter.clone(),
            llm_limiter.clone(),
            expander,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(modules, user_limiter.clone(), llm_limiter.clone(), telemetry)
            .with_request_timeout(config.request_timeout())
            .with_intent_parser(IntentParser::new(orchestrator));

        let state = AppState::new(Arc::new(dispatcher), sink.clone(), user_limiter, llm_limiter);
        let router = build_router(state.clone());

        Self {
            state,
            router,
            sink,
            primary,
            secondary,
        }
    }

    /// POST a webhook body to /callback.
    pub async fn post_webhook(&self, body: Value) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::post("/callback")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        (status, json)
    }

    /// GET /health.
    pub async fn health(&self) -> Value {
        let response = self
            .router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Deliver one text message and return what the bot replied.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Vec<Reply> {
        let token = reply_token();
        self.deliver(text_event(chat_id, &token, text)).await;
        self.replies_for(&token).await
    }

    /// Deliver one postback and return what the bot replied, if anything.
    pub async fn send_postback(&self, chat_id: &str, data: &str) -> Vec<Reply> {
        let token = reply_token();
        self.deliver(postback_event(chat_id, &token, data)).await;
        self.replies_for(&token).await
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.state.dispatcher.telemetry().snapshot()
    }

    async fn deliver(&self, event: Value) {
        let (status, body) = self.post_webhook(json!({ "events": [event] })).await;
        assert_eq!(status, StatusCode::OK, "webhook rejected: {body}");
    }

    async fn replies_for(&self, token: &str) -> Vec<Reply> {
        let deadline = tokio::time::Instant::now() + SEND_WAIT;
        loop {
            if let Some(sent) = self.sink.sent().into_iter().find(|s| s.reply_token == token) {
                return sent.replies;
            }
            if tokio::time::Instant::now() >= deadline {
                return Vec::new();
            }
            let seen = self.sink.sent().len();
            self.sink.wait_for(seen + 1, Duration::from_millis(100)).await;
        }
    }
}

fn adapter(provider: &Arc<ScriptedProvider>, seed: u64) -> ProviderAdapter {
    let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(4));
    ProviderAdapter::new(provider.clone(), Retrier::seeded(policy, seed))
        .with_intent_models([INTENT_MODEL])
        .with_expander_models([EXPANDER_MODEL])
}

pub fn reply_token() -> String {
    format!("rt-{}", Uuid::now_v7())
}

pub fn text_event(chat_id: &str, reply_token: &str, text: &str) -> Value {
    json!({
        "type": "message",
        "replyToken": reply_token,
        "source": { "type": "user", "userId": chat_id },
        "message": { "type": "text", "id": "1", "text": text }
    })
}

pub fn postback_event(chat_id: &str, reply_token: &str, data: &str) -> Value {
    json!({
        "type": "postback",
        "replyToken": reply_token,
        "source": { "type": "user", "userId": chat_id },
        "postback": { "data": data }
    })
}

