//! Academic programs (學程) and the courses that count toward them.

use std::sync::Arc;

use async_trait::async_trait;
use cq_protocol::{MAX_QUICK_REPLIES, Params, Postback, QuickReply, Reply};

use super::{MAX_LISTED, Module, postback_button, required_param};
use crate::catalog::{Program, ProgramCatalog, ProgramCourse, SemesterLookup};
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::{exact_regex, keyword_regex};
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "program";

const LIST_KEYWORDS: &[&str] = &["學程列表", "學程清單", "所有學程", "programs", "program list"];
const LIST_BARE_KEYWORDS: &[&str] = &["學程", "program"];
const COURSES_KEYWORDS: &[&str] = &["學程課程", "program courses"];
const SEARCH_KEYWORDS: &[&str] = &["學程", "program"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    List,
    Courses,
    Search,
}

pub struct ProgramModule {
    router: PatternRouter<Action>,
    catalog: Arc<dyn ProgramCatalog>,
    semesters: Arc<dyn SemesterLookup>,
}

impl ProgramModule {
    pub fn new(
        catalog: Arc<dyn ProgramCatalog>,
        semesters: Arc<dyn SemesterLookup>,
    ) -> Result<Self, regex::Error> {
        let router = PatternRouter::new(vec![
            Matcher::new(1, "list", keyword_regex(LIST_KEYWORDS)?, Action::List),
            Matcher::new(1, "list_bare", exact_regex(LIST_BARE_KEYWORDS)?, Action::List),
            Matcher::new(1, "courses", keyword_regex(COURSES_KEYWORDS)?, Action::Courses),
            Matcher::new(2, "search", keyword_regex(SEARCH_KEYWORDS)?, Action::Search),
        ]);
        Ok(Self {
            router,
            catalog,
            semesters,
        })
    }

    async fn list(&self) -> Vec<Reply> {
        let programs = self.catalog.programs().await;
        if programs.is_empty() {
            return vec![Reply::text("目前沒有學程資料。")];
        }
        let mut text = format!("🎓 學程列表（共 {} 個）\n", programs.len());
        text.push_str(
            &programs
                .iter()
                .map(|p| format!("• {}（{}）", p.name, p.category))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        vec![Reply::text_with_quick_replies(text, course_buttons(&programs))]
    }

    async fn search(&self, query: &str) -> Vec<Reply> {
        let programs = self.catalog.search(query).await;
        if programs.is_empty() {
            return vec![Reply::text_with_quick_replies(
                format!("查無「{query}」相關學程。"),
                vec![QuickReply::message("學程列表", "學程列表")],
            )];
        }
        let shown = programs.len().min(MAX_LISTED);
        let mut text = format!("🔍「{query}」相關學程\n");
        text.push_str(
            &programs[..shown]
                .iter()
                .map(describe)
                .collect::<Vec<_>>()
                .join("\n\n"),
        );
        vec![Reply::text_with_quick_replies(text, course_buttons(&programs[..shown]))]
    }

    async fn courses(&self, name: &str) -> Vec<Reply> {
        let Some(program) = self.catalog.find(name).await else {
            return vec![Reply::text_with_quick_replies(
                format!("查無「{name}」學程。"),
                vec![QuickReply::message("學程列表", "學程列表")],
            )];
        };

        let current = self.semesters.current_semesters().await;
        let offered: Vec<&ProgramCourse> = program
            .courses
            .iter()
            .filter(|c| current.is_empty() || current.contains(&c.semester))
            .collect();

        if offered.is_empty() {
            return vec![Reply::text(format!("「{}」本學期沒有開設相關課程。", program.name))];
        }

        let (required, elective): (Vec<&ProgramCourse>, Vec<&ProgramCourse>) =
            offered.into_iter().partition(|c| c.required);
        let mut text = format!("📚 {} 本學期課程\n", program.name);
        for (label, group) in [("必修", &required), ("選修", &elective)] {
            if group.is_empty() {
                continue;
            }
            text.push_str(&format!("\n【{label}】\n"));
            text.push_str(
                &group
                    .iter()
                    .map(|c| format!("• {} {}", c.uid(), c.title))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }

        let quick: Vec<QuickReply> = required
            .iter()
            .chain(elective.iter())
            .take(MAX_QUICK_REPLIES)
            .filter_map(|c| postback_button(&c.title, super::course::NAME, "uid", &c.uid()))
            .collect();
        vec![Reply::text_with_quick_replies(text.trim_end().to_string(), quick)]
    }
}

fn describe(program: &Program) -> String {
    let mut line = format!("• {}（{}）", program.name, program.category);
    if let Some(url) = &program.url {
        line.push_str(&format!("\n  {url}"));
    }
    line
}

fn course_buttons(programs: &[Program]) -> Vec<QuickReply> {
    programs
        .iter()
        .take(MAX_QUICK_REPLIES)
        .filter_map(|p| postback_button(&p.name, NAME, "courses", &p.name))
        .collect()
}

#[async_trait]
impl Module for ProgramModule {
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
            (Action::List, _) | (Action::Search, None) => self.list().await,
            (Action::Courses, Some(name)) => self.courses(name).await,
            (Action::Courses, None) => vec![Reply::text_with_quick_replies(
                "請在關鍵字後加上學程名稱，例如「學程課程 人工智慧」。",
                vec![QuickReply::message("學程列表", "學程列表")],
            )],
            (Action::Search, Some(query)) => self.search(query).await,
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        match (postback.action, postback.data()) {
            ("list", _) => self.list().await,
            ("courses", Some(name)) => self.courses(name).await,
            ("courses", None) => {
                ctx.malformed_postback(NAME, postback.action, "missing program name");
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
            "list" => Ok(self.list().await),
            "search" => {
                let query = required_param(params, NAME, intent, "query")?;
                Ok(self.search(query).await)
            }
            "courses" => {
                let name = required_param(params, NAME, intent, "program_name")?;
                Ok(self.courses(name).await)
            }
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![QuickReply::message("學程列表", "學程列表")]
    }
}
