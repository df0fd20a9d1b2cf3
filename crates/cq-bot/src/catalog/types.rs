//! Campus entity types.

use serde::{Deserialize, Serialize};

/// Academic year (ROC calendar, e.g. 113) and term (1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Semester {
    pub year: u16,
    pub term: u8,
}

impl Semester {
    pub fn new(year: u16, term: u8) -> Self {
        Self { year, term }
    }

    /// `1131` for 113-1, the prefix used in full course uids.
    pub fn code(&self) -> String {
        format!("{}{}", self.year, self.term)
    }
}

impl std::fmt::Display for Semester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.year, self.term)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub semester: Semester,
    /// Course number without semester prefix, e.g. `U0001`.
    pub no: String,
    pub title: String,
    pub teachers: Vec<String>,
    pub department: String,
    pub credits: u8,
    /// Weekday/period text as published.
    pub schedule: String,
    pub location: String,
    /// Free-text outline used by ranked search.
    #[serde(default)]
    pub summary: String,
}

impl Course {
    /// Full uid, e.g. `1131U0001`.
    pub fn uid(&self) -> String {
        format!("{}{}", self.semester.code(), self.no)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub admission_year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Organization,
    Individual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub kind: ContactKind,
    /// Parent unit for individuals, empty for top-level units.
    #[serde(default)]
    pub organization: String,
    pub phone: String,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    /// Category such as 學士學程 or 微學程.
    pub category: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub courses: Vec<ProgramCourse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramCourse {
    pub semester: Semester,
    pub no: String,
    pub title: String,
    pub required: bool,
}

impl ProgramCourse {
    pub fn uid(&self) -> String {
        format!("{}{}", self.semester.code(), self.no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semester_code_and_display() {
        let s = Semester::new(113, 1);
        assert_eq!(s.code(), "1131");
        assert_eq!(s.to_string(), "113-1");
        assert!(Semester::new(113, 2) > s);
    }
}
