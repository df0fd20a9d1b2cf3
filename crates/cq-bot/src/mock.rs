//! In-memory data sources and a recording reply sink.
//!
//! `SampleData` backs every catalog trait with a small fixed campus; the
//! binary uses it when no real data source is wired in, and tests use it
//! everywhere.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cq_llm::CallContext;
use cq_protocol::Reply;
use tokio::sync::Notify;

use crate::catalog::{
    Contact, ContactDirectory, ContactKind, Course, CourseCatalog, Department, Program,
    ProgramCatalog, ProgramCourse, Semester, SemesterLookup, Student, StudentDirectory,
};
use crate::context::MessageContext;
use crate::error::SinkError;
use crate::sink::ReplySink;
use crate::telemetry::Telemetry;

/// Fresh context with its own telemetry and no deadline.
pub fn test_context() -> MessageContext {
    MessageContext::new(
        "C-test",
        "U-test",
        CallContext::new(),
        Arc::new(Telemetry::new()),
    )
}

pub struct SampleData {
    semesters: Vec<Semester>,
    courses: Vec<Course>,
    students: Vec<Student>,
    departments: Vec<Department>,
    contacts: Vec<Contact>,
    emergency: Vec<Contact>,
    programs: Vec<Program>,
}

#[allow(clippy::too_many_arguments)]
fn course(
    semester: Semester,
    no: &str,
    title: &str,
    teacher: &str,
    department: &str,
    credits: u8,
    schedule: &str,
    summary: &str,
) -> Course {
    Course {
        semester,
        no: no.into(),
        title: title.into(),
        teachers: vec![teacher.into()],
        department: department.into(),
        credits,
        schedule: schedule.into(),
        location: "三峽校區".into(),
        summary: summary.into(),
    }
}

fn contact(
    name: &str,
    kind: ContactKind,
    organization: &str,
    phone: &str,
    ext: Option<&str>,
) -> Contact {
    Contact {
        name: name.into(),
        kind,
        organization: organization.into(),
        phone: phone.into(),
        extension: ext.map(Into::into),
        email: None,
    }
}

fn program_course(semester: Semester, no: &str, title: &str, required: bool) -> ProgramCourse {
    ProgramCourse {
        semester,
        no: no.into(),
        title: title.into(),
        required,
    }
}

impl SampleData {
    pub fn new() -> Self {
        let fall = Semester::new(113, 1);
        let spring = Semester::new(113, 2);
        let old = Semester::new(112, 1);

        let courses = vec![
            course(fall, "U0001", "微積分", "王大明", "數學系", 3, "一 2-4", "極限 導數 積分 calculus"),
            course(spring, "U0002", "機器學習導論", "陳建志", "資訊工程學系", 3, "三 6-8", "machine learning 監督式學習 AI 人工智慧"),
            course(spring, "U0005", "雲端運算", "林美玲", "資訊工程學系", 3, "四 2-4", "cloud computing AWS GCP 容器"),
            course(fall, "M0010", "資料分析實務", "張志明", "統計學系", 3, "二 5-7", "data analysis python 統計 資料科學"),
            course(spring, "P0003", "會計學", "吳淑芬", "會計學系", 3, "五 2-4", "accounting CPA 財務報表"),
            course(old, "U0009", "程式設計", "黃偉", "資訊工程學系", 3, "一 6-8", "programming C 語言"),
        ];

        let students = vec![
            Student {
                student_id: "412345678".into(),
                name: "王小明".into(),
                department: "資訊工程學系".into(),
                admission_year: 112,
            },
            Student {
                student_id: "412345679".into(),
                name: "王大同".into(),
                department: "經濟學系".into(),
                admission_year: 112,
            },
            Student {
                student_id: "41134567".into(),
                name: "李小美".into(),
                department: "法律學系".into(),
                admission_year: 111,
            },
        ];

        let departments = [
            ("71", "法律學系"),
            ("73", "經濟學系"),
            ("79", "會計學系"),
            ("85", "資訊工程學系"),
        ]
        .into_iter()
        .map(|(code, name)| Department {
            code: code.into(),
            name: name.into(),
        })
        .collect();

        let emergency = vec![
            contact("校安中心", ContactKind::Organization, "", "02-8674-1111", Some("66119")),
            contact("警衛室", ContactKind::Organization, "", "02-8674-1111", Some("66110")),
        ];
        let mut contacts = vec![
            contact("圖書館", ContactKind::Organization, "", "02-8674-1111", Some("66300")),
            contact("流通櫃台", ContactKind::Individual, "圖書館", "02-8674-1111", Some("66301")),
            contact("資訊中心", ContactKind::Organization, "", "02-8674-1111", Some("66500")),
            contact("註冊組", ContactKind::Organization, "教務處", "02-8674-1111", Some("66120")),
        ];
        contacts.extend(emergency.iter().cloned());

        let programs = vec![
            Program {
                name: "人工智慧學程".into(),
                category: "學士學程".into(),
                url: Some("https://example.edu.tw/programs/ai".into()),
                courses: vec![
                    program_course(spring, "U0002", "機器學習導論", true),
                    program_course(fall, "M0010", "資料分析實務", false),
                    program_course(old, "U0009", "程式設計", true),
                ],
            },
            Program {
                name: "資料科學學程".into(),
                category: "微學程".into(),
                url: None,
                courses: vec![program_course(fall, "M0010", "資料分析實務", true)],
            },
            Program {
                name: "智慧財產權學程".into(),
                category: "學士學程".into(),
                url: None,
                courses: Vec::new(),
            },
        ];

        Self {
            semesters: vec![spring, fall],
            courses,
            students,
            departments,
            contacts,
            emergency,
            programs,
        }
    }
}

impl Default for SampleData {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

#[async_trait]
impl SemesterLookup for SampleData {
    async fn current_semesters(&self) -> Vec<Semester> {
        self.semesters.clone()
    }
}

#[async_trait]
impl CourseCatalog for SampleData {
    async fn search(&self, keyword: &str, semesters: &[Semester]) -> Vec<Course> {
        self.courses
            .iter()
            .filter(|c| semesters.is_empty() || semesters.contains(&c.semester))
            .filter(|c| {
                contains_ci(&c.title, keyword) || c.teachers.iter().any(|t| contains_ci(t, keyword))
            })
            .cloned()
            .collect()
    }

    async fn find_by_uid(&self, uid: &str) -> Option<Course> {
        let uid = uid.trim().to_uppercase();
        if uid.len() > 5 {
            return self.courses.iter().find(|c| c.uid() == uid).cloned();
        }
        // Bare course number: newest semester first.
        self.courses
            .iter()
            .filter(|c| c.no == uid)
            .max_by_key(|c| c.semester)
            .cloned()
    }

    async fn courses_in(&self, semesters: &[Semester]) -> Vec<Course> {
        self.courses
            .iter()
            .filter(|c| semesters.contains(&c.semester))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StudentDirectory for SampleData {
    async fn by_student_id(&self, student_id: &str) -> Option<Student> {
        self.students.iter().find(|s| s.student_id == student_id).cloned()
    }

    async fn search_by_name(&self, name: &str) -> Vec<Student> {
        self.students
            .iter()
            .filter(|s| contains_ci(&s.name, name))
            .cloned()
            .collect()
    }

    async fn departments(&self) -> Vec<Department> {
        self.departments.clone()
    }
}

#[async_trait]
impl ContactDirectory for SampleData {
    async fn search(&self, query: &str) -> Vec<Contact> {
        self.contacts
            .iter()
            .filter(|c| contains_ci(&c.name, query) || contains_ci(&c.organization, query))
            .cloned()
            .collect()
    }

    async fn emergency(&self) -> Vec<Contact> {
        self.emergency.clone()
    }
}

#[async_trait]
impl ProgramCatalog for SampleData {
    async fn programs(&self) -> Vec<Program> {
        self.programs.clone()
    }

    async fn search(&self, query: &str) -> Vec<Program> {
        self.programs
            .iter()
            .filter(|p| contains_ci(&p.name, query) || contains_ci(&p.category, query))
            .cloned()
            .collect()
    }

    async fn find(&self, name: &str) -> Option<Program> {
        self.programs
            .iter()
            .find(|p| p.name == name.trim())
            .or_else(|| self.programs.iter().find(|p| contains_ci(&p.name, name)))
            .cloned()
    }
}

/// A reply handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SentReply {
    pub reply_token: String,
    pub chat_id: String,
    pub replies: Vec<Reply>,
}

/// Mock `ReplySink` that records every send.
pub struct RecordingSink {
    sent: Mutex<Vec<SentReply>>,
    notify: Notify,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
            fail: false,
        }
    }

    /// Sink that records, then reports a transport failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: &str) -> Vec<SentReply> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` sends were recorded. Returns what was
    /// recorded either way.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<SentReply> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.sent()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(
        &self,
        reply_token: &str,
        chat_id: &str,
        replies: &[Reply],
    ) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(SentReply {
            reply_token: reply_token.to_string(),
            chat_id: chat_id.to_string(),
            replies: replies.to_vec(),
        });
        self.notify.notify_waiters();
        if self.fail {
            return Err(SinkError::Transport("recording sink set to fail".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn course_lookup_by_full_and_bare_uid() {
        let data = SampleData::new();
        assert_eq!(data.find_by_uid("1131U0001").await.unwrap().title, "微積分");
        assert_eq!(data.find_by_uid("u0005").await.unwrap().title, "雲端運算");
        assert!(data.find_by_uid("1121U0001").await.is_none());
    }

    #[tokio::test]
    async fn search_filters_semesters() {
        let data = SampleData::new();
        let current = data.current_semesters().await;
        assert!(CourseCatalog::search(&data, "程式設計", &current).await.is_empty());
        assert_eq!(CourseCatalog::search(&data, "程式設計", &[]).await.len(), 1);
    }

    #[tokio::test]
    async fn recording_sink_wait_for() {
        let sink = Arc::new(RecordingSink::new());
        let writer = sink.clone();
        tokio::spawn(async move {
            writer.send("rt", "C1", &[Reply::text("hi")]).await.unwrap();
        });
        let sent = sink.wait_for(1, Duration::from_secs(1)).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sink.sent_to("C1")[0].replies, vec![Reply::text("hi")]);
    }
}
