//! Event dispatcher.
//!
//! Admission, keyword routing, NLU fallback and postback routing for one
//! inbound event. Every path ends in a user-visible reply (or an empty
//! reply for dropped postbacks); raw errors never reach the user.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cq_llm::{CallContext, IntentParser};
use cq_protocol::{MAX_QUICK_REPLIES, ParseResult, Postback, QuickReply, Reply};
use cq_ratelimit::KeyedLimiter;

use crate::context::MessageContext;
use crate::modules::Module;
use crate::modules::help::help_reply;
use crate::router::{FALLBACK_REPLY, ensure_reply};
use crate::telemetry::Telemetry;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

const TIMEOUT_REPLY: &str = "查詢逾時，請稍後再試。";
const NLU_UNAVAILABLE_REPLY: &str = "我沒能理解這句話，可以試試以下關鍵字：";
const NLU_THROTTLED_REPLY: &str = "AI 查詢額度暫時用完了，請先用關鍵字查詢：";

pub struct Dispatcher {
    modules: Vec<Arc<dyn Module>>,
    user_limiter: Arc<KeyedLimiter>,
    llm_limiter: Arc<KeyedLimiter>,
    intent_parser: Option<IntentParser>,
    telemetry: Arc<Telemetry>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        modules: Vec<Arc<dyn Module>>,
        user_limiter: Arc<KeyedLimiter>,
        llm_limiter: Arc<KeyedLimiter>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            modules,
            user_limiter,
            llm_limiter,
            intent_parser: None,
            telemetry,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Enable NLU for messages no module claims.
    pub fn with_intent_parser(mut self, parser: IntentParser) -> Self {
        self.intent_parser = Some(parser);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn nlu_enabled(&self) -> bool {
        self.intent_parser.is_some()
    }

    fn module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    fn context(&self, chat_id: &str, user_id: &str) -> MessageContext {
        MessageContext::new(
            chat_id,
            user_id,
            CallContext::with_timeout(self.request_timeout),
            self.telemetry.clone(),
        )
    }

    /// Webhook admission. `Some(reply)` when the chat is throttled.
    fn admit(&self, chat_id: &str) -> Option<Reply> {
        if self.user_limiter.allow(chat_id) {
            return None;
        }
        self.telemetry.throttled();
        let wait = self
            .user_limiter
            .usage_stats(chat_id)
            .secs_until_next_token()
            .map(|s| s.ceil().max(1.0) as u64);
        tracing::info!(chat_id, wait_secs = ?wait, "message throttled");
        let text = match wait {
            Some(secs) => format!("訊息太頻繁了，請約 {secs} 秒後再試。"),
            None => "訊息太頻繁了，請稍後再試。".to_string(),
        };
        Some(Reply::text(text))
    }

    /// Handle a text message.
    pub async fn on_text(
        self: &Arc<Self>,
        chat_id: &str,
        user_id: &str,
        text: &str,
    ) -> Vec<Reply> {
        self.telemetry.message();
        if let Some(reply) = self.admit(chat_id) {
            return vec![reply];
        }

        let ctx = self.context(chat_id, user_id);
        let this = Arc::clone(self);
        let task_ctx = ctx.clone();
        let text = text.to_string();
        self.isolate(&ctx, "text", async move { this.route_text(&task_ctx, &text).await })
            .await
    }

    /// Handle a postback payload.
    pub async fn on_postback(
        self: &Arc<Self>,
        chat_id: &str,
        user_id: &str,
        data: &str,
    ) -> Vec<Reply> {
        self.telemetry.postback();
        if let Some(reply) = self.admit(chat_id) {
            return vec![reply];
        }

        let ctx = self.context(chat_id, user_id);
        let Some(postback) = Postback::decode(data) else {
            ctx.malformed_postback("-", data, "unparseable payload");
            return Vec::new();
        };
        let Some(module) = self.module(postback.module).cloned() else {
            ctx.malformed_postback(postback.module, data, "unknown module");
            return Vec::new();
        };

        let task_ctx = ctx.clone();
        let data = data.to_string();
        self.isolate(&ctx, "postback", async move {
            match Postback::decode(&data) {
                Some(postback) => module.handle_postback(&task_ctx, &postback).await,
                None => Vec::new(),
            }
        })
        .await
    }

    /// Run a handler in its own task so a panic or overrun costs only this
    /// event.
    async fn isolate<F>(&self, ctx: &MessageContext, kind: &'static str, work: F) -> Vec<Reply>
    where
        F: Future<Output = Vec<Reply>> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.request_timeout, handle).await {
            Ok(Ok(replies)) => replies,
            Ok(Err(err)) if err.is_panic() => {
                self.telemetry.handler_panic();
                tracing::error!(chat_id = %ctx.chat_id, kind, "handler panicked");
                vec![Reply::text(FALLBACK_REPLY)]
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    chat_id = %ctx.chat_id,
                    kind,
                    error = %err,
                    "handler task cancelled"
                );
                vec![Reply::text(FALLBACK_REPLY)]
            }
            Err(_) => {
                abort.abort();
                ctx.call.cancel();
                self.telemetry.timeout();
                tracing::warn!(
                    chat_id = %ctx.chat_id,
                    kind,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "handler timed out"
                );
                vec![Reply::text(TIMEOUT_REPLY)]
            }
        }
    }

    async fn route_text(&self, ctx: &MessageContext, text: &str) -> Vec<Reply> {
        let text = text.trim();
        if text.is_empty() {
            return vec![help_reply()];
        }

        if let Some(module) = self.modules.iter().find(|m| m.can_handle(text)) {
            self.telemetry.keyword_routed();
            tracing::debug!(chat_id = %ctx.chat_id, module = module.name(), "keyword route");
            return module.handle_message(ctx, text).await;
        }

        let Some(parser) = &self.intent_parser else {
            return vec![self.hints_reply(NLU_UNAVAILABLE_REPLY)];
        };
        if !self.llm_limiter.allow(&ctx.chat_id) {
            self.telemetry.llm_throttled();
            tracing::info!(chat_id = %ctx.chat_id, "NLU throttled");
            return vec![self.hints_reply(NLU_THROTTLED_REPLY)];
        }

        self.telemetry.nlu_request();
        match parser.parse(&ctx.call, text).await {
            Ok(parsed) => self.dispatch_parsed(ctx, parsed).await,
            Err(err) => {
                self.telemetry.nlu_failure(err.class());
                tracing::warn!(
                    chat_id = %ctx.chat_id,
                    class = %err.class(),
                    error = %err,
                    "NLU failed, replying with help"
                );
                vec![help_reply()]
            }
        }
    }

    /// Hand a parsed intent to its module.
    pub async fn dispatch_parsed(&self, ctx: &MessageContext, parsed: ParseResult) -> Vec<Reply> {
        if parsed.is_direct_reply() {
            return match parsed.param("message").map(str::trim).filter(|m| !m.is_empty()) {
                Some(message) => vec![Reply::text(message)],
                None => vec![help_reply()],
            };
        }

        let Some(module) = self.module(&parsed.module) else {
            self.telemetry.contract_violation();
            tracing::error!(
                module = %parsed.module,
                function = %parsed.function_name,
                "intent names a module that is not registered"
            );
            return vec![help_reply()];
        };

        match module.dispatch_intent(ctx, &parsed.intent, &parsed.params).await {
            Ok(replies) => ensure_reply(ctx, module.name(), &parsed.intent, replies),
            Err(err) => {
                self.telemetry.dispatch_error(&err);
                tracing::warn!(
                    chat_id = %ctx.chat_id,
                    kind = err.kind(),
                    error = %err,
                    "intent dispatch failed"
                );
                vec![help_reply()]
            }
        }
    }

    fn hints_reply(&self, text: &str) -> Reply {
        let hints: Vec<QuickReply> = self
            .modules
            .iter()
            .flat_map(|m| m.keyword_hints())
            .take(MAX_QUICK_REPLIES)
            .collect();
        Reply::text_with_quick_replies(text, hints)
    }
}
