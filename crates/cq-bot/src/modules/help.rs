//! Usage guide. Also the reply for anything the bot could not understand.

use async_trait::async_trait;
use cq_protocol::{Params, Postback, QuickReply, Reply};

use super::Module;
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::keyword_regex;
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "help";

const KEYWORDS: &[&str] = &["help", "幫助", "說明", "使用說明", "指令", "功能", "?", "？"];

const GUIDE: &str = "\
我可以幫你查詢：
📚 課程：「課程 微積分」「找課 想學資料分析」「1131U0001」
🎓 學程：「學程列表」「學程 人工智慧」
👤 學號：「學號 王小明」「412345678」「系代碼 資工」
📞 聯絡：「聯絡 圖書館」「緊急電話」
📊 額度：「額度」
也可以直接用一句話描述你想查的內容。";

/// Example messages, one per feature.
pub fn quick_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::message("查課程", "課程 微積分"),
        QuickReply::message("學程列表", "學程列表"),
        QuickReply::message("聯絡單位", "聯絡 圖書館"),
        QuickReply::message("緊急電話", "緊急電話"),
        QuickReply::message("使用額度", "額度"),
    ]
}

/// The full guide with feature quick replies.
pub fn help_reply() -> Reply {
    Reply::text_with_quick_replies(GUIDE, quick_replies())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Guide,
}

pub struct HelpModule {
    router: PatternRouter<Action>,
}

impl HelpModule {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            router: PatternRouter::new(vec![Matcher::new(
                1,
                "guide",
                keyword_regex(KEYWORDS)?,
                Action::Guide,
            )]),
        })
    }
}

#[async_trait]
impl Module for HelpModule {
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
            Action::Guide => vec![help_reply()],
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        match postback.action {
            "show" => vec![help_reply()],
            other => {
                ctx.malformed_postback(NAME, other, "unknown action");
                Vec::new()
            }
        }
    }

    async fn dispatch_intent(
        &self,
        _ctx: &MessageContext,
        intent: &str,
        _params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        match intent {
            "help" => Ok(vec![help_reply()]),
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![QuickReply::message("使用說明", "help")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::test_context;

    #[tokio::test]
    async fn help_keywords() {
        let module = HelpModule::new().unwrap();
        assert!(module.can_handle("help"));
        assert!(module.can_handle("HELP"));
        assert!(module.can_handle("？"));
        assert!(!module.can_handle("helpful"));

        let replies = module.handle_message(&test_context(), "說明").await;
        assert_eq!(replies, vec![help_reply()]);
    }

    #[tokio::test]
    async fn help_intent() {
        let module = HelpModule::new().unwrap();
        let ctx = test_context();
        assert!(module.dispatch_intent(&ctx, "help", &Params::new()).await.is_ok());
        assert_eq!(
            module.dispatch_intent(&ctx, "dance", &Params::new()).await.unwrap_err(),
            DispatchError::unknown("help", "dance")
        );
    }

    #[tokio::test]
    async fn unknown_postback_is_dropped() {
        let module = HelpModule::new().unwrap();
        let ctx = test_context();
        let pb = Postback::decode("help:nope").unwrap();
        assert!(module.handle_postback(&ctx, &pb).await.is_empty());
        assert_eq!(ctx.telemetry.snapshot().malformed_postbacks, 1);
    }
}
