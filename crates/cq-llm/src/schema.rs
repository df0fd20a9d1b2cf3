//! Function schema offered to the model during intent parsing.
//!
//! One function per supported intent. The table is closed: a function name
//! the model invents is a schema violation, not a new intent.

use serde_json::{Map, Value, json};

/// A named string parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// A callable function and the module intent it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub module: &'static str,
    pub intent: &'static str,
    pub params: &'static [ParamSpec],
}

const fn required(name: &'static str, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        description,
        required: true,
    }
}

/// Every function the intent parser declares.
pub static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "course_search",
        description: "Search courses by course title or teacher name, e.g. 微積分, 王教授.",
        module: "course",
        intent: "search",
        params: &[required("keyword", "Course title or teacher name to look for")],
    },
    FunctionSpec {
        name: "course_smart",
        description: "Find courses by topic or learning goal when the user describes what they want to learn rather than a title.",
        module: "course",
        intent: "smart",
        params: &[required("query", "Topic or description of the desired course content")],
    },
    FunctionSpec {
        name: "course_uid",
        description: "Look up one course by its course number such as 1131U0001 or U0001.",
        module: "course",
        intent: "uid",
        params: &[required("uid", "Course number")],
    },
    FunctionSpec {
        name: "id_search",
        description: "Find students by (part of) their name.",
        module: "id",
        intent: "search",
        params: &[required("name", "Student name or part of it")],
    },
    FunctionSpec {
        name: "id_student_id",
        description: "Look up a student by an 8 or 9 digit student ID.",
        module: "id",
        intent: "student_id",
        params: &[required("student_id", "Student ID digits")],
    },
    FunctionSpec {
        name: "id_department",
        description: "Look up a department code or the department a code belongs to.",
        module: "id",
        intent: "department",
        params: &[required("department", "Department name or numeric code")],
    },
    FunctionSpec {
        name: "contact_search",
        description: "Find phone numbers or e-mail addresses of university offices and staff.",
        module: "contact",
        intent: "search",
        params: &[required("query", "Office, unit or person to contact")],
    },
    FunctionSpec {
        name: "contact_emergency",
        description: "List emergency phone numbers (campus security, health center).",
        module: "contact",
        intent: "emergency",
        params: &[],
    },
    FunctionSpec {
        name: "program_list",
        description: "List all academic programs (學程).",
        module: "program",
        intent: "list",
        params: &[],
    },
    FunctionSpec {
        name: "program_search",
        description: "Search academic programs by name or topic.",
        module: "program",
        intent: "search",
        params: &[required("query", "Program name or topic")],
    },
    FunctionSpec {
        name: "program_courses",
        description: "List the courses that belong to one academic program.",
        module: "program",
        intent: "courses",
        params: &[required("program_name", "Program name")],
    },
    FunctionSpec {
        name: "usage_query",
        description: "Show the user's remaining message and AI quota.",
        module: "usage",
        intent: "query",
        params: &[],
    },
    FunctionSpec {
        name: "help",
        description: "Explain what the bot can do and how to use it.",
        module: "help",
        intent: "help",
        params: &[],
    },
    FunctionSpec {
        name: "direct_reply",
        description: "Reply directly for greetings, thanks, chit-chat or questions outside the supported lookups.",
        module: cq_protocol::DIRECT_REPLY_MODULE,
        intent: "reply",
        params: &[required("message", "The reply to send, in the user's language")],
    },
];

/// Look up a declared function by name.
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

impl FunctionSpec {
    /// Declared parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema for the parameters object.
    ///
    /// `type_case` lets providers that expect upper-case OpenAPI type names
    /// (Gemini) share the same table.
    pub fn parameters_schema(&self, type_case: TypeCase) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            properties.insert(
                p.name.to_string(),
                json!({ "type": type_case.string(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": type_case.object(),
            "properties": properties,
            "required": required,
        })
    }
}

/// Spelling of JSON Schema type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCase {
    Lower,
    Upper,
}

impl TypeCase {
    fn object(self) -> &'static str {
        match self {
            Self::Lower => "object",
            Self::Upper => "OBJECT",
        }
    }

    fn string(self) -> &'static str {
        match self {
            Self::Lower => "string",
            Self::Upper => "STRING",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = FUNCTIONS.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), FUNCTIONS.len());
    }

    #[test]
    fn every_documented_function_is_declared() {
        for name in [
            "course_search",
            "course_smart",
            "course_uid",
            "id_search",
            "id_student_id",
            "id_department",
            "contact_search",
            "contact_emergency",
            "program_list",
            "program_search",
            "program_courses",
            "usage_query",
            "help",
            "direct_reply",
        ] {
            assert!(lookup(name).is_some(), "{name} missing");
        }
        assert!(lookup("course_delete").is_none());
    }

    #[test]
    fn direct_reply_maps_to_reserved_module() {
        assert_eq!(lookup("direct_reply").unwrap().module, "direct_reply");
    }

    #[test]
    fn schema_lists_required_params() {
        let schema = lookup("program_courses")
            .unwrap()
            .parameters_schema(TypeCase::Lower);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["program_name"]["type"], "string");
        assert_eq!(schema["required"][0], "program_name");
    }

    #[test]
    fn upper_case_schema_for_gemini() {
        let schema = lookup("course_search")
            .unwrap()
            .parameters_schema(TypeCase::Upper);
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["keyword"]["type"], "STRING");
    }

    #[test]
    fn parameterless_functions_have_empty_schema() {
        let schema = lookup("help").unwrap().parameters_schema(TypeCase::Lower);
        assert!(schema["properties"].as_object().unwrap().is_empty());
        assert!(schema["required"].as_array().unwrap().is_empty());
    }
}
