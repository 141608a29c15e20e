use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Host text format tag carried alongside rich-text columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TextFormat {
    Moodle = 0,
    #[default]
    Html = 1,
    Plain = 2,
    Markdown = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub fullname: String,
    pub format: String,
    pub cache_rev: i64,
}

/// A course module joined with its module type name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseModule {
    pub id: i64,
    pub course: i64,
    pub module_name: String,
    pub instance: i64,
    pub section: i64,
}

/// Host-owned course section. `section` is the per-course section number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HostSection {
    pub id: i64,
    pub course: i64,
    pub section: i32,
    pub name: Option<String>,
    pub summary: String,
    pub summary_format: TextFormat,
    pub sequence: Vec<i64>,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEvent {
    pub event_name: String,
    pub user_id: i64,
    pub course_id: i64,
    pub course_module_id: Option<i64>,
    pub other: Value,
    pub created_at: DateTime<Utc>,
}
