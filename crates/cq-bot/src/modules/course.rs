//! Course search, ranked "smart" search and uid lookup.

use std::sync::Arc;

use async_trait::async_trait;
use cq_llm::QueryExpander;
use cq_protocol::{MAX_QUICK_REPLIES, Params, Postback, QuickReply, Reply};
use cq_ratelimit::KeyedLimiter;
use regex::Regex;

use super::{MAX_LISTED, Module, postback_button, required_param};
use crate::catalog::{Course, CourseCatalog, SemesterLookup};
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::keyword_regex;
use crate::rank::Bm25;
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "course";

/// Optional semester prefix (`1131`), then the course number (`U0001`).
const UID_PATTERN: &str = r"^(?:\d{3,4})?[UMNPumnp]\d{4}$";
const SMART_KEYWORDS: &[&str] = &["找課", "推薦課程", "智慧搜尋", "smart"];
const SEARCH_KEYWORDS: &[&str] = &["課程", "課", "course", "class"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Uid,
    Smart,
    Search,
}

pub struct CourseModule {
    router: PatternRouter<Action>,
    catalog: Arc<dyn CourseCatalog>,
    semesters: Arc<dyn SemesterLookup>,
    expander: Arc<QueryExpander>,
    /// Expansion is an LLM call and spends the chat's NLU budget.
    llm_limiter: Arc<KeyedLimiter>,
}

impl CourseModule {
    pub fn new(
        catalog: Arc<dyn CourseCatalog>,
        semesters: Arc<dyn SemesterLookup>,
        expander: Arc<QueryExpander>,
        llm_limiter: Arc<KeyedLimiter>,
    ) -> Result<Self, regex::Error> {
        let router = PatternRouter::new(vec![
            Matcher::new(0, "uid", Regex::new(UID_PATTERN)?, Action::Uid),
            Matcher::new(1, "smart", keyword_regex(SMART_KEYWORDS)?, Action::Smart),
            Matcher::new(2, "search", keyword_regex(SEARCH_KEYWORDS)?, Action::Search),
        ]);
        Ok(Self {
            router,
            catalog,
            semesters,
            expander,
            llm_limiter,
        })
    }

    /// Whether `query` may go to the expander. Only queries the expander
    /// would actually send spend a token.
    fn admit_expansion(&self, ctx: &MessageContext, query: &str) -> bool {
        if !self.expander.is_enabled() || !self.expander.should_expand(query) {
            return false;
        }
        if self.llm_limiter.allow(&ctx.chat_id) {
            return true;
        }
        ctx.telemetry.llm_throttled();
        tracing::info!(chat_id = %ctx.chat_id, "expansion throttled, ranking the original query");
        false
    }

    async fn by_uid(&self, uid: &str) -> Vec<Reply> {
        let uid = uid.trim().to_uppercase();
        match self.catalog.find_by_uid(&uid).await {
            Some(course) => vec![Reply::text(detail(&course))],
            None => vec![Reply::text(format!("查無課程代碼 {uid}。"))],
        }
    }

    async fn search(&self, keyword: &str) -> Vec<Reply> {
        let semesters = self.semesters.current_semesters().await;
        let courses = self.catalog.search(keyword, &semesters).await;
        if courses.is_empty() {
            return vec![Reply::text_with_quick_replies(
                format!("查無「{keyword}」相關課程。"),
                vec![QuickReply::message("智慧搜尋", format!("找課 {keyword}"))],
            )];
        }
        vec![listing(&format!("📚「{keyword}」共 {} 門課程", courses.len()), &courses)]
    }

    async fn smart(&self, ctx: &MessageContext, query: &str) -> Vec<Reply> {
        let expanded = if self.admit_expansion(ctx, query) {
            self.expander.expand(&ctx.call, query).await
        } else {
            query.trim().to_string()
        };
        let semesters = self.semesters.current_semesters().await;
        let courses = self.catalog.courses_in(&semesters).await;

        let index = Bm25::new(courses.iter().map(document));
        let hits = index.search(&expanded, MAX_LISTED);
        tracing::debug!(
            query,
            expanded = %expanded,
            candidates = index.len(),
            hits = hits.len(),
            "ranked course search"
        );
        if hits.is_empty() {
            return vec![Reply::text_with_quick_replies(
                format!("找不到與「{query}」相關的課程，試試更換描述。"),
                vec![QuickReply::message("課程關鍵字", format!("課程 {query}"))],
            )];
        }

        let ranked: Vec<Course> = hits.into_iter().map(|(i, _)| courses[i].clone()).collect();
        vec![listing(&format!("✨「{query}」推薦課程"), &ranked)]
    }
}

/// Text indexed for ranked search.
fn document(course: &Course) -> String {
    format!(
        "{} {} {} {}",
        course.title,
        course.teachers.join(" "),
        course.department,
        course.summary
    )
}

fn detail(course: &Course) -> String {
    format!(
        "📘 {}\n課號：{}（{}）\n教師：{}\n開課系所：{}\n學分：{}\n時間：{}\n地點：{}",
        course.title,
        course.uid(),
        course.semester,
        course.teachers.join("、"),
        course.department,
        course.credits,
        course.schedule,
        course.location,
    )
}

fn listing(header: &str, courses: &[Course]) -> Reply {
    let shown = courses.len().min(MAX_LISTED);
    let mut text = format!("{header}\n");
    text.push_str(
        &courses[..shown]
            .iter()
            .map(|c| format!("• {} {}（{}）", c.uid(), c.title, c.teachers.join("、")))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if courses.len() > shown {
        text.push_str(&format!("\n…還有 {} 門，請輸入更精確的關鍵字", courses.len() - shown));
    }
    let quick = courses[..shown]
        .iter()
        .take(MAX_QUICK_REPLIES)
        .filter_map(|c| postback_button(&c.title, NAME, "uid", &c.uid()))
        .collect();
    Reply::text_with_quick_replies(text, quick)
}

fn usage_hint() -> Reply {
    Reply::text_with_quick_replies(
        "請在關鍵字後加上課名或教師，例如「課程 微積分」，或用「找課 想學資料分析」描述需求。",
        vec![
            QuickReply::message("課程 微積分", "課程 微積分"),
            QuickReply::message("找課 資料分析", "找課 資料分析"),
        ],
    )
}

#[async_trait]
impl Module for CourseModule {
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
            (Action::Uid, _) => self.by_uid(route.text()).await,
            (Action::Smart, Some(query)) => self.smart(ctx, query).await,
            (Action::Search, Some(keyword)) => self.search(keyword).await,
            (Action::Smart | Action::Search, None) => vec![usage_hint()],
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        match (postback.action, postback.data()) {
            ("uid", Some(uid)) => self.by_uid(uid).await,
            ("search", Some(keyword)) => self.search(keyword).await,
            ("uid" | "search", None) => {
                ctx.malformed_postback(NAME, postback.action, "missing data");
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
        ctx: &MessageContext,
        intent: &str,
        params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        match intent {
            "search" => {
                let keyword = required_param(params, NAME, intent, "keyword")?;
                Ok(self.search(keyword).await)
            }
            "smart" => {
                let query = required_param(params, NAME, intent, "query")?;
                Ok(self.smart(ctx, query).await)
            }
            "uid" => {
                let uid = required_param(params, NAME, intent, "uid")?;
                Ok(self.by_uid(uid).await)
            }
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![
            QuickReply::message("查課程", "課程 微積分"),
            QuickReply::message("智慧找課", "找課 資料分析"),
        ]
    }
}
