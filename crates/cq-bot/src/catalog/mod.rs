//! Read-only data sources the modules query.
//!
//! Scraping and persistence live elsewhere; the bot only needs these
//! lookups. `crate::mock::SampleData` implements all of them in memory.

pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use types::{Contact, ContactKind, Course, Department, Program, ProgramCourse, Semester, Student};

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Courses whose title or teacher contains `keyword` (case-insensitive).
    async fn search(&self, keyword: &str, semesters: &[Semester]) -> Vec<Course>;

    /// Exact uid lookup. `uid` may omit the semester prefix (`U0001`).
    async fn find_by_uid(&self, uid: &str) -> Option<Course>;

    /// Every course offered in `semesters`, for ranked search.
    async fn courses_in(&self, semesters: &[Semester]) -> Vec<Course>;
}

/// Which semesters count as "current". Shared with the program module so it
/// does not depend on the course module itself.
#[async_trait]
pub trait SemesterLookup: Send + Sync {
    /// Most recent first.
    async fn current_semesters(&self) -> Vec<Semester>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn by_student_id(&self, student_id: &str) -> Option<Student>;
    async fn search_by_name(&self, name: &str) -> Vec<Student>;
    async fn departments(&self) -> Vec<Department>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn search(&self, query: &str) -> Vec<Contact>;
    async fn emergency(&self) -> Vec<Contact>;
}

#[async_trait]
pub trait ProgramCatalog: Send + Sync {
    async fn programs(&self) -> Vec<Program>;
    async fn search(&self, query: &str) -> Vec<Program>;
    /// Program by exact or partial name, with its course list.
    async fn find(&self, name: &str) -> Option<Program>;
}

/// The data sources the standard module set is built from.
#[derive(Clone)]
pub struct DataSources {
    pub courses: Arc<dyn CourseCatalog>,
    pub semesters: Arc<dyn SemesterLookup>,
    pub students: Arc<dyn StudentDirectory>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub programs: Arc<dyn ProgramCatalog>,
}

impl DataSources {
    /// Every source backed by the in-memory sample campus.
    pub fn sample() -> Self {
        let data = Arc::new(crate::mock::SampleData::new());
        Self {
            courses: data.clone(),
            semesters: data.clone(),
            students: data.clone(),
            contacts: data.clone(),
            programs: data,
        }
    }
}
