//! Student ID and department code lookup.

use std::sync::Arc;

use async_trait::async_trait;
use cq_protocol::{Params, Postback, QuickReply, Reply};
use regex::Regex;

use super::{MAX_LISTED, Module, postback_button, required_param};
use crate::catalog::{Department, Student, StudentDirectory};
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};
use crate::keyword::keyword_regex;
use crate::router::{Matcher, PatternRouter, ensure_reply};

pub const NAME: &str = "id";

const DEPARTMENT_KEYWORDS: &[&str] = &["系代碼", "科系", "系所", "department", "dept"];
const SEARCH_KEYWORDS: &[&str] = &["學號", "學生", "student", "id"];
const STUDENT_ID_PATTERN: &str = r"^(\d{8,9})$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    StudentId,
    Department,
    Search,
}

pub struct IdModule {
    router: PatternRouter<Action>,
    directory: Arc<dyn StudentDirectory>,
}

fn is_student_id(text: &str) -> bool {
    (8..=9).contains(&text.len()) && text.bytes().all(|b| b.is_ascii_digit())
}

impl IdModule {
    pub fn new(directory: Arc<dyn StudentDirectory>) -> Result<Self, regex::Error> {
        let router = PatternRouter::new(vec![
            Matcher::new(1, "student_id", Regex::new(STUDENT_ID_PATTERN)?, Action::StudentId),
            Matcher::new(1, "department", keyword_regex(DEPARTMENT_KEYWORDS)?, Action::Department),
            Matcher::new(2, "search", keyword_regex(SEARCH_KEYWORDS)?, Action::Search),
        ]);
        Ok(Self { router, directory })
    }

    async fn by_student_id(&self, student_id: &str) -> Vec<Reply> {
        match self.directory.by_student_id(student_id).await {
            Some(student) => vec![Reply::text(format!("🎓 學號 {}\n{}", student.student_id, describe(&student)))],
            None => vec![Reply::text(format!("查無學號 {student_id} 的學生資料。"))],
        }
    }

    async fn search(&self, name: &str) -> Vec<Reply> {
        if is_student_id(name) {
            return self.by_student_id(name).await;
        }
        let students = self.directory.search_by_name(name).await;
        if students.is_empty() {
            return vec![Reply::text(format!("查無姓名包含「{name}」的學生。"))];
        }
        let shown = students.len().min(MAX_LISTED);
        let mut text = format!("🔍「{name}」共 {} 筆\n", students.len());
        text.push_str(
            &students[..shown]
                .iter()
                .map(|s| format!("• {} {}", s.student_id, describe(s)))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        if students.len() > shown {
            text.push_str(&format!("\n…還有 {} 筆", students.len() - shown));
        }
        vec![Reply::text(text)]
    }

    async fn department(&self, query: Option<&str>) -> Vec<Reply> {
        let departments = self.directory.departments().await;
        let Some(query) = query else {
            let mut text = String::from("🏫 系所代碼\n");
            text.push_str(&render_departments(&departments));
            return vec![Reply::text(text)];
        };

        let matches: Vec<Department> = if query.bytes().all(|b| b.is_ascii_digit()) {
            departments.into_iter().filter(|d| d.code == query).collect()
        } else {
            let lowered = query.to_lowercase();
            departments
                .into_iter()
                .filter(|d| d.name.to_lowercase().contains(&lowered))
                .collect()
        };

        if matches.is_empty() {
            return vec![Reply::text_with_quick_replies(
                format!("查無「{query}」的系所代碼。"),
                postback_button("所有系所", NAME, "departments", "")
                    .into_iter()
                    .collect(),
            )];
        }
        vec![Reply::text(render_departments(&matches))]
    }
}

fn describe(student: &Student) -> String {
    format!("{}（{}，{} 學年入學）", student.name, student.department, student.admission_year)
}

fn render_departments(departments: &[Department]) -> String {
    departments
        .iter()
        .map(|d| format!("{} {}", d.code, d.name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Module for IdModule {
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
            Action::StudentId => self.by_student_id(route.text()).await,
            Action::Department => self.department(route.term()).await,
            Action::Search => match route.term() {
                Some(name) => self.search(name).await,
                None => vec![Reply::text_with_quick_replies(
                    "請在關鍵字後加上姓名或學號，例如「學號 王小明」。",
                    vec![QuickReply::message("系所代碼", "系代碼")],
                )],
            },
        };
        ensure_reply(ctx, NAME, route.name, replies)
    }

    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        match postback.action {
            "departments" => self.department(None).await,
            "department" => self.department(postback.data()).await,
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
        params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        match intent {
            "search" => {
                let name = required_param(params, NAME, intent, "name")?;
                Ok(self.search(name).await)
            }
            "student_id" => {
                let student_id = required_param(params, NAME, intent, "student_id")?;
                Ok(self.by_student_id(student_id).await)
            }
            "department" => {
                let department = required_param(params, NAME, intent, "department")?;
                Ok(self.department(Some(department)).await)
            }
            other => Err(DispatchError::unknown(NAME, other)),
        }
    }

    fn keyword_hints(&self) -> Vec<QuickReply> {
        vec![QuickReply::message("系所代碼", "系代碼")]
    }
}
