//! Record store seam.
//!
//! Every engine operation runs against a `StoreTx`: a transaction handle that
//! exposes typed reads and writes over host and subpage tables. Dropping a
//! `StoreTx` without calling `commit` discards all of its writes.
//!
//! Production: `PgStore` (sqlx transactions on a `PgPool`).
//! Testing: `MemoryStore` (snapshot on begin, swapped in on commit).

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::models::course::{Course, CourseModule, HostSection, LogEvent, TextFormat};
use crate::models::page::{NewPage, Page, PageSectionLink};

pub use postgres::PgStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ── Host lookups ────────────────────────────────────────────────────────

    async fn find_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError>;

    /// Like `find_course`, but holds a row lock on the course until the
    /// transaction ends.
    async fn lock_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError>;

    async fn find_course_module(&mut self, cm_id: i64) -> Result<Option<CourseModule>, AppError>;

    async fn find_section(&mut self, section_id: i64) -> Result<Option<HostSection>, AppError>;

    /// Course modules currently placed in a section, lowest id first.
    async fn section_modules(&mut self, section_id: i64) -> Result<Vec<CourseModule>, AppError>;

    async fn count_section_modules(
        &mut self,
        course_id: i64,
        section_id: i64,
    ) -> Result<i64, AppError>;

    /// Every section number in use in the course, linked or not.
    async fn course_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError>;

    // ── Host writes ─────────────────────────────────────────────────────────

    /// Host section-creation API: an empty, visible section at `number`.
    async fn create_section(&mut self, course_id: i64, number: i32)
        -> Result<HostSection, AppError>;

    async fn update_section_text(
        &mut self,
        section_id: i64,
        name: Option<&str>,
        summary: &str,
        summary_format: TextFormat,
    ) -> Result<(), AppError>;

    async fn delete_section(&mut self, section_id: i64) -> Result<(), AppError>;

    /// Deletes the row `id` from a module type's instance table.
    async fn delete_instance_record(&mut self, table: &str, id: i64) -> Result<u64, AppError>;

    async fn delete_module_files(&mut self, cm_id: i64) -> Result<u64, AppError>;

    async fn delete_course_module(&mut self, cm_id: i64) -> Result<u64, AppError>;

    async fn remove_from_sequence(&mut self, section_id: i64, cm_id: i64) -> Result<(), AppError>;

    async fn insert_event(&mut self, event: &LogEvent) -> Result<(), AppError>;

    async fn bump_cache_revision(&mut self, course_id: i64) -> Result<(), AppError>;

    // ── Pages ───────────────────────────────────────────────────────────────

    async fn find_page(&mut self, page_id: i64) -> Result<Option<Page>, AppError>;

    async fn insert_page(&mut self, page: &NewPage, now: DateTime<Utc>) -> Result<Page, AppError>;

    async fn update_page(&mut self, page: &Page) -> Result<(), AppError>;

    async fn delete_page(&mut self, page_id: i64) -> Result<(), AppError>;

    // ── Page section links ──────────────────────────────────────────────────

    /// Links of a page ordered by `page_order`, ties broken by id.
    async fn page_links(&mut self, page_id: i64) -> Result<Vec<PageSectionLink>, AppError>;

    /// Links of a page joined to their host sections, in page order.
    async fn page_sections(
        &mut self,
        page_id: i64,
    ) -> Result<Vec<(PageSectionLink, HostSection)>, AppError>;

    async fn find_link(
        &mut self,
        page_id: i64,
        section_id: i64,
    ) -> Result<Option<PageSectionLink>, AppError>;

    /// Section numbers of every host section in the course that some page links.
    async fn linked_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError>;

    async fn insert_link(
        &mut self,
        page_id: i64,
        section_id: i64,
        page_order: i32,
        stealth: bool,
    ) -> Result<PageSectionLink, AppError>;

    async fn set_link_order(&mut self, link_id: i64, page_order: i32) -> Result<(), AppError>;

    /// Returns the number of links updated.
    async fn set_link_stealth(&mut self, section_id: i64, stealth: bool) -> Result<u64, AppError>;

    async fn delete_link(&mut self, link_id: i64) -> Result<(), AppError>;

    // ── Transaction control ─────────────────────────────────────────────────

    async fn savepoint(&mut self) -> Result<(), AppError>;

    async fn release_savepoint(&mut self) -> Result<(), AppError>;

    async fn rollback_to_savepoint(&mut self) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// True for lowercase SQL identifiers safe to splice into a statement.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}
