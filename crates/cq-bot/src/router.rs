//! Priority-ordered pattern/action table shared by `can_handle` and
//! `handle_message`.
//!
//! A module builds one `PatternRouter` at construction and asks it both
//! whether it claims a message and which action to run, so the two answers
//! cannot drift apart.

use cq_protocol::Reply;
use regex::{Captures, Regex};

use crate::context::MessageContext;

/// Shown when a handler claimed a message but produced nothing.
pub const FALLBACK_REPLY: &str = "抱歉，處理您的查詢時發生問題，請稍後再試。";

/// One `(priority, pattern, action, name)` entry. Lower priority runs first.
#[derive(Debug)]
pub struct Matcher<A> {
    pub priority: u8,
    pub name: &'static str,
    pub action: A,
    pattern: Regex,
}

impl<A> Matcher<A> {
    pub fn new(priority: u8, name: &'static str, pattern: Regex, action: A) -> Self {
        Self {
            priority,
            name,
            action,
            pattern,
        }
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

/// A matched message with its capture groups.
#[derive(Debug)]
pub struct RouteMatch<'t, A> {
    pub name: &'static str,
    pub action: A,
    captures: Captures<'t>,
}

impl<'t, A> RouteMatch<'t, A> {
    /// The whole (trimmed) message.
    pub fn text(&self) -> &'t str {
        self.captures.get(0).map_or("", |m| m.as_str())
    }

    pub fn group(&self, index: usize) -> Option<&'t str> {
        self.captures.get(index).map(|m| m.as_str())
    }

    /// Text after the keyword, trimmed; `None` when blank.
    pub fn term(&self) -> Option<&'t str> {
        self.group(1).map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug)]
pub struct PatternRouter<A> {
    matchers: Vec<Matcher<A>>,
}

impl<A: Copy> PatternRouter<A> {
    /// Sorts by priority; equal priorities keep declaration order.
    pub fn new(mut matchers: Vec<Matcher<A>>) -> Self {
        matchers.sort_by_key(|m| m.priority);
        Self { matchers }
    }

    pub fn matchers(&self) -> &[Matcher<A>] {
        &self.matchers
    }

    pub fn can_handle(&self, text: &str) -> bool {
        let text = text.trim();
        self.matchers.iter().any(|m| m.pattern.is_match(text))
    }

    /// First matcher, in priority order, whose pattern accepts `text`.
    pub fn find<'t>(&self, text: &'t str) -> Option<RouteMatch<'t, A>> {
        let text = text.trim();
        self.matchers.iter().find_map(|m| {
            m.pattern.captures(text).map(|captures| RouteMatch {
                name: m.name,
                action: m.action,
                captures,
            })
        })
    }
}

/// Enforce that a claimed message gets at least one reply.
pub fn ensure_reply(
    ctx: &MessageContext,
    module: &str,
    matcher: &str,
    replies: Vec<Reply>,
) -> Vec<Reply> {
    if !replies.is_empty() {
        return replies;
    }
    ctx.telemetry.contract_violation();
    tracing::error!(
        module,
        matcher,
        chat_id = %ctx.chat_id,
        "handler returned no reply for a message its module claimed"
    );
    vec![Reply::text(FALLBACK_REPLY)]
}
