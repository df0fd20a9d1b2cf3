//! Shows the caller's remaining message and AI quota.

use std::sync::Arc;

use async_trait::async_trait;
use cq_protocol::{Params, QuickReply, Reply};
use cq_ratelimit::{KeyedLimiter, UsageStats};

use super::Module;
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::keyword_regex;
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "usage";

const KEYWORDS: &[&str] = &["額度", "用量", "配額", "quota", "usage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Query,
}

pub struct UsageModule {
    router: PatternRouter<Action>,
    messages: Arc<KeyedLimiter>,
    llm: Arc<KeyedLimiter>,
}

impl UsageModule {
    pub fn new(messages: Arc<KeyedLimiter>, llm: Arc<KeyedLimiter>) -> Result<Self, regex::Error> {
        Ok(Self {
            router: PatternRouter::new(vec![Matcher::new(
                1,
                "query",
                keyword_regex(KEYWORDS)?,
                Action::Query,
            )]),
            messages,
            llm,
        })
    }

    fn report(&self, chat_id: &str) -> Reply {
        let messages = self.messages.usage_stats(chat_id);
        let llm = self.llm.usage_stats(chat_id);

        let mut text = String::from("📊 使用額度\n");
        text.push_str(&format!(
            "訊息：可用 {}/{}（{}）\n",
            messages.burst_whole(),
            messages.burst_max as u32,
            refill_text(&messages)
        ));
        text.push_str(&format!(
            "AI 查詢：可用 {}/{}（{}）",
            llm.burst_whole(),
            llm.burst_max as u32,
            refill_text(&llm)
        ));
        if llm.daily_enabled() {
            text.push_str(&format!(
                "\n今日 AI 查詢剩餘 {}/{}，每日午夜（台北時間）重置",
                llm.daily_remaining, llm.daily_max
            ));
        }
        Reply::text(text)
    }
}

/// Human wording of a refill rate given in tokens per second.
fn refill_text(stats: &UsageStats) -> String {
    let rate = stats.burst_refill_rate;
    if rate <= 0.0 {
        return "不自動回復".to_string();
    }
    if rate >= 1.0 {
        return format!("每秒回復 {} 次", rate.round() as u64);
    }
    let per_hour = rate * 3600.0;
    if per_hour < 60.0 {
        return format!("每小時回復 {} 次", per_hour.round() as u64);
    }
    format!("每 {} 秒回復 1 次", (1.0 / rate).round() as u64)
}

#[async_trait]
impl Module for UsageModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_handle(&self, text: &str) -> bool {
        self.router.can_handle(text)
    }

    async fn handle_message(&self, ctx: &MessageContext, text: &str) -> Vec<Reply> {
        let Some(route) = self.router.find(text) else {
            return Vec::new();
        };
        let replies = match route.action {
            Action::Query => vec![self.report(&ctx.chat_id)],
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn dispatch_intent(
        &self,
        ctx: &MessageContext,
        intent: &str,
        _params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        match intent {
            "query" => Ok(vec![self.report(&ctx.chat_id)]),
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![QuickReply::message("使用額度", "額度")]
    }
}
