use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::course::{Course, CourseModule, HostSection, TextFormat};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Page {
    pub id: i64,
    pub course: i64,
    pub name: String,
    pub intro: String,
    pub intro_format: TextFormat,
    pub time_modified: DateTime<Utc>,
}

/// Join row placing a host section at `page_order` within a page.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PageSectionLink {
    pub id: i64,
    pub subpage_id: i64,
    pub section_id: i64,
    pub page_order: i32,
    pub stealth: bool,
}

/// A page resolved from its course module, with the owning course.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPage {
    pub course_module: CourseModule,
    pub page: Page,
    pub course: Course,
}

/// One entry of a page's ordered section listing.
#[derive(Debug, Clone, Serialize)]
pub struct PageSection {
    pub link_id: i64,
    pub page_order: i32,
    pub stealth: bool,
    pub display_name: String,
    pub section: HostSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPage {
    pub course: i64,
    pub name: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub intro_format: TextFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageUpdate {
    pub name: Option<String>,
    pub intro: Option<String>,
    pub intro_format: Option<TextFormat>,
}
