//! Office and staff contact lookup.

use std::sync::Arc;

use async_trait::async_trait;
use cq_protocol::{Params, Postback, QuickReply, Reply};

use super::{MAX_LISTED, Module, postback_button, required_param};
use crate::catalog::{Contact, ContactDirectory, ContactKind};
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::keyword_regex;
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "contact";

const EMERGENCY_KEYWORDS: &[&str] = &["緊急電話", "緊急", "emergency"];
const SEARCH_KEYWORDS: &[&str] = &["聯絡", "聯繫", "電話", "分機", "contact"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Emergency,
    Search,
}

pub struct ContactModule {
    router: PatternRouter<Action>,
    directory: Arc<dyn ContactDirectory>,
}

impl ContactModule {
    pub fn new(directory: Arc<dyn ContactDirectory>) -> Result<Self, regex::Error> {
        let router = PatternRouter::new(vec![
            Matcher::new(1, "emergency", keyword_regex(EMERGENCY_KEYWORDS)?, Action::Emergency),
            Matcher::new(2, "search", keyword_regex(SEARCH_KEYWORDS)?, Action::Search),
        ]);
        Ok(Self { router, directory })
    }

    async fn emergency(&self) -> Vec<Reply> {
        let contacts = self.directory.emergency().await;
        if contacts.is_empty() {
            return vec![Reply::text("目前沒有緊急聯絡資料，如遇緊急狀況請撥 110 或 119。")];
        }
        let mut text = String::from("🚨 緊急聯絡電話\n");
        text.push_str(&render(&contacts));
        text.push_str("\n\n校外緊急：報案 110、消防救護 119");
        vec![Reply::text(text)]
    }

    async fn search(&self, query: &str) -> Vec<Reply> {
        let contacts = self.directory.search(query).await;
        if contacts.is_empty() {
            return vec![Reply::text_with_quick_replies(
                format!("查無「{query}」的聯絡資訊，請換個關鍵字試試。"),
                vec![QuickReply::message("緊急電話", "緊急電話")],
            )];
        }

        let mut text = format!("📞「{query}」的聯絡資訊\n");
        let shown = contacts.len().min(MAX_LISTED);
        text.push_str(&render(&contacts[..shown]));
        if contacts.len() > shown {
            text.push_str(&format!("\n…還有 {} 筆，請輸入更精確的名稱", contacts.len() - shown));
        }

        // Offer drill-down into units that matched.
        let quick: Vec<QuickReply> = contacts
            .iter()
            .filter(|c| c.kind == ContactKind::Organization && c.name != query)
            .take(5)
            .filter_map(|c| postback_button(&c.name, NAME, "search", &c.name))
            .collect();
        vec![Reply::text_with_quick_replies(text, quick)]
    }

    fn usage_hint() -> Reply {
        Reply::text_with_quick_replies(
            "請在關鍵字後加上單位或姓名，例如「聯絡 圖書館」。",
            vec![
                QuickReply::message("聯絡 圖書館", "聯絡 圖書館"),
                QuickReply::message("緊急電話", "緊急電話"),
            ],
        )
    }
}

fn render(contacts: &[Contact]) -> String {
    contacts
        .iter()
        .map(|c| {
            let mut line = match (c.kind, c.organization.is_empty()) {
                (ContactKind::Individual, false) => format!("• {}（{}）", c.name, c.organization),
                _ => format!("• {}", c.name),
            };
            line.push_str(&format!(" ☎ {}", c.phone));
            if let Some(ext) = &c.extension {
                line.push_str(&format!(" 分機 {ext}"));
            }
            if let Some(email) = &c.email {
                line.push_str(&format!(" ✉ {email}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Module for ContactModule {
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
        let replies = match (route.action, route.term()) {
            (Action::Emergency, _) => self.emergency().await,
            (Action::Search, Some(query)) => self.search(query).await,
            (Action::Search, None) => vec![Self::usage_hint()],
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        match (postback.action, postback.data()) {
            ("emergency", _) => self.emergency().await,
            ("search", Some(query)) => self.search(query).await,
            ("search", None) => {
                ctx.malformed_postback(NAME, postback.action, "missing search term");
                Vec::new()
            }
            (other, _) => {
                ctx.malformed_postback(NAME, other, "unknown action");
                Vec::new()
            }
        }
    }

    async fn dispatch_intent(
        &self,
        _ctx: &MessageContext,
        intent: &str,
        params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        match intent {
            "search" => {
                let query = required_param(params, NAME, intent, "query")?;
                Ok(self.search(query).await)
            }
            "emergency" => Ok(self.emergency().await),
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![
            QuickReply::message("聯絡單位", "聯絡 圖書館"),
            QuickReply::message("緊急電話", "緊急電話"),
        ]
    }
}
