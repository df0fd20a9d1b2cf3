use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Module identifier used for conversational turns that need no lookup.
pub const DIRECT_REPLY_MODULE: &str = "direct_reply";

/// Parameter map handed from NLU to a module's intent hook.
///
/// Ordered so replies built from params are reproducible.
pub type Params = BTreeMap<String, String>;

/// Result of natural-language understanding for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Target module (e.g. "course", "program", "direct_reply").
    pub module: String,
    /// Operation inside the module (e.g. "search", "list", "courses").
    pub intent: String,
    /// Named string arguments extracted by the model. May be empty.
    #[serde(default)]
    pub params: Params,
    /// Vendor function name that produced this result, kept for telemetry.
    pub function_name: String,
}

impl ParseResult {
    pub fn new(
        module: impl Into<String>,
        intent: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            intent: intent.into(),
            params: Params::new(),
            function_name: function_name.into(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn is_direct_reply(&self) -> bool {
        self.module == DIRECT_REPLY_MODULE
    }

    /// Trimmed, non-empty parameter value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_params() {
        let result = ParseResult::new("course", "search", "course_search")
            .with_param("keyword", "微積分");
        assert_eq!(result.param("keyword"), Some("微積分"));
        assert!(!result.is_direct_reply());
    }

    #[test]
    fn blank_param_reads_as_absent() {
        let result = ParseResult::new("program", "search", "program_search").with_param("query", "  ");
        assert_eq!(result.param("query"), None);
        assert_eq!(result.param("missing"), None);
    }

    #[test]
    fn direct_reply_detection() {
        let result = ParseResult::new(DIRECT_REPLY_MODULE, "reply", "direct_reply");
        assert!(result.is_direct_reply());
    }

    #[test]
    fn deserialize_without_params() {
        let json = r#"{"module":"help","intent":"help","function_name":"help"}"#;
        let result: ParseResult = serde_json::from_str(json).unwrap();
        assert!(result.params.is_empty());
    }
}
