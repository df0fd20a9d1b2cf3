//! Feature modules.
//!
//! Each module owns a `PatternRouter` for keyword messages, an optional
//! postback decoder, and an optional intent hook used after NLU.

pub mod contact;
pub mod course;
pub mod help;
pub mod id;
pub mod program;
pub mod usage;

use std::sync::Arc;

use async_trait::async_trait;
use cq_llm::QueryExpander;
use cq_protocol::{Params, Postback, QuickReply, Reply};
use cq_ratelimit::KeyedLimiter;

use crate::catalog::DataSources;
use crate::context::MessageContext;
use crate::error::{DispatchError, DispatchResult};

pub use contact::ContactModule;
pub use course::CourseModule;
pub use help::HelpModule;
pub use id::IdModule;
pub use program::ProgramModule;
pub use usage::UsageModule;

/// Largest number of result lines put in one text reply.
pub const MAX_LISTED: usize = 10;

#[async_trait]
pub trait Module: Send + Sync {
    /// Also the postback prefix (`name:`) and the NLU module id.
    fn name(&self) -> &'static str;

    fn can_handle(&self, text: &str) -> bool;

    /// Non-empty whenever `can_handle(text)` is true.
    async fn handle_message(&self, ctx: &MessageContext, text: &str) -> Vec<Reply>;

    /// Empty for payloads the module cannot decode.
    async fn handle_postback(&self, ctx: &MessageContext, postback: &Postback<'_>) -> Vec<Reply> {
        ctx.malformed_postback(self.name(), postback.action, "module takes no postbacks");
        Vec::new()
    }

    async fn dispatch_intent(
        &self,
        _ctx: &MessageContext,
        intent: &str,
        _params: &Params,
    ) -> DispatchResult<Vec<Reply>> {
        Err(DispatchError::unknown(self.name(), intent))
    }

    /// Example keyword messages offered when NLU is unavailable.
    fn keyword_hints(&self) -> Vec<QuickReply> {
        Vec::new()
    }
}

/// All modules in routing order. Earlier modules win when keywords overlap.
pub fn standard_modules(
    sources: &DataSources,
    user_limiter: Arc<KeyedLimiter>,
    llm_limiter: Arc<KeyedLimiter>,
    expander: Arc<QueryExpander>,
) -> Result<Vec<Arc<dyn Module>>, regex::Error> {
    Ok(vec![
        Arc::new(HelpModule::new()?),
        Arc::new(UsageModule::new(user_limiter, llm_limiter.clone())?),
        Arc::new(ContactModule::new(sources.contacts.clone())?),
        Arc::new(ProgramModule::new(sources.programs.clone(), sources.semesters.clone())?),
        Arc::new(IdModule::new(sources.students.clone())?),
        Arc::new(CourseModule::new(
            sources.courses.clone(),
            sources.semesters.clone(),
            expander,
            llm_limiter,
        )?),
    ])
}

/// Trimmed, non-empty parameter or `MissingParameter`.
pub fn required_param<'p>(
    params: &'p Params,
    module: &'static str,
    intent: &str,
    key: &'static str,
) -> DispatchResult<&'p str> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DispatchError::missing(module, intent, key))
}

/// `module:action$data` postback quick reply; `None` when the payload would
/// not fit the platform limit.
pub fn postback_button(label: &str, module: &str, action: &str, data: &str) -> Option<QuickReply> {
    match cq_protocol::postback::encode(module, action, data) {
        Ok(payload) => Some(QuickReply::postback(truncate_label(label), payload)),
        Err(err) => {
            tracing::debug!(error = %err, module, action, "skipping postback button");
            None
        }
    }
}

/// LINE caps quick-reply labels at 20 characters.
pub fn truncate_label(label: &str) -> String {
    const MAX: usize = 20;
    if label.chars().count() <= MAX {
        return label.to_string();
    }
    let mut cut: String = label.chars().take(MAX - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_param_rejects_blank() {
        let mut params = Params::new();
        params.insert("query".into(), "  ".into());
        let err = required_param(&params, "contact", "search", "query").unwrap_err();
        assert_eq!(err, DispatchError::missing("contact", "search", "query"));

        params.insert("query".into(), " 圖書館 ".into());
        assert_eq!(required_param(&params, "contact", "search", "query").unwrap(), "圖書館");
    }

    #[test]
    fn long_payloads_produce_no_button() {
        assert!(postback_button("x", "program", "courses", &"學".repeat(200)).is_none());
        let button = postback_button("人工智慧學程", "program", "courses", "人工智慧學程").unwrap();
        assert_eq!(
            button.action,
            cq_protocol::QuickAction::Postback("program:courses$人工智慧學程".into())
        );
    }

    #[test]
    fn standard_modules_have_unique_names() {
        let limiter = || Arc::new(KeyedLimiter::new("t", cq_ratelimit::KeyedConfig::new(1, 1.0)));
        let modules = standard_modules(
            &DataSources::sample(),
            limiter(),
            limiter(),
            Arc::new(QueryExpander::disabled()),
        )
        .unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["help", "usage", "contact", "program", "id", "course"]);
    }

    #[test]
    fn labels_are_truncated() {
        assert_eq!(truncate_label("短"), "短");
        let long = "一".repeat(30);
        assert_eq!(truncate_label(&long).chars().count(), 20);
    }
}
