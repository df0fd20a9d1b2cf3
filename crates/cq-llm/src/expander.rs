//! Query expansion for keyword search.
//!
//! Short or acronym-bearing queries are sent to the model, which appends
//! synonyms and translations. The user's own tokens are always kept so
//! the ranked search over the expansion never loses the original terms.
//! Expansion is advisory: any failure yields the input unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::CallContext;
use crate::fallback::FallbackOrchestrator;

/// Instructions for the expander model.
pub const SYSTEM_PROMPT: &str = "\
You expand search queries for a university course catalog in Taiwan. \
Given a short query, output the original query followed by closely related \
search keywords: synonyms, the Traditional Chinese or English translation, and \
the full form of any acronym. Output a single line of space-separated keywords \
with no explanation, numbering or punctuation, at most 20 keywords.";

/// Longest expansion kept, in characters.
const MAX_OUTPUT_RUNES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpanderConfig {
    /// Inputs up to this many characters are expanded.
    pub max_runes: usize,
    /// Upper-case acronyms that trigger expansion regardless of length.
    pub acronyms: Vec<String>,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        let acronyms = [
            "AI", "ML", "DL", "NLP", "LLM", "CV", "AR", "VR", "IOT", "API", "SQL", "DB", "OS",
            "AWS", "GCP", "UI", "UX", "GIS", "ESG", "CPA", "IC", "PM",
        ];
        Self {
            max_runes: 15,
            acronyms: acronyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct QueryExpander {
    orchestrator: Option<Arc<FallbackOrchestrator>>,
    config: ExpanderConfig,
}

impl QueryExpander {
    pub fn new(orchestrator: Arc<FallbackOrchestrator>, config: ExpanderConfig) -> Self {
        Self {
            orchestrator: Some(orchestrator),
            config,
        }
    }

    /// Expander with no providers; `expand` is the identity.
    pub fn disabled() -> Self {
        Self {
            orchestrator: None,
            config: ExpanderConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.orchestrator.is_some()
    }

    pub fn should_expand(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        if query.chars().count() <= self.config.max_runes {
            return true;
        }
        query
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .any(|t| {
                self.config
                    .acronyms
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(t))
            })
    }

    /// Expanded query, or `query` verbatim when expansion is skipped or fails.
    pub async fn expand(&self, ctx: &CallContext, query: &str) -> String {
        let Some(orchestrator) = &self.orchestrator else {
            return query.to_string();
        };
        if !self.should_expand(query) {
            return query.to_string();
        }

        match orchestrator.expand_query(ctx, query.trim()).await {
            Ok(raw) => {
                let expanded = merge_with_original(query, &clean(&raw));
                tracing::debug!(query = %query, expanded = %expanded, "query expanded");
                expanded
            }
            Err(err) => {
                tracing::warn!(
                    query = %query,
                    class = %err.class(),
                    error = %err,
                    "query expansion failed, using original"
                );
                query.to_string()
            }
        }
    }
}

/// Single-line, whitespace-collapsed, length-bounded model output.
fn clean(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .map(|c| match c {
            '"' | '\'' | '`' | '「' | '」' | ',' | '，' | '、' => ' ',
            c if c.is_whitespace() => ' ',
            c => c,
        })
        .collect();
    let joined = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    joined.chars().take(MAX_OUTPUT_RUNES).collect::<String>().trim_end().to_string()
}

/// Keep every original token: if the model dropped one, prepend the query.
fn merge_with_original(query: &str, expansion: &str) -> String {
    let query = query.trim();
    if expansion.is_empty() {
        return query.to_string();
    }
    let expanded: HashSet<String> = expansion
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    let keeps_all = query
        .split_whitespace()
        .all(|token| expanded.contains(&token.to_lowercase()));
    if keeps_all {
        expansion.to_string()
    } else {
        format!("{query} {expansion}")
    }
}
