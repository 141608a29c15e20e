use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::errors::AppError;
use crate::models::course::{Course, CourseModule, HostSection, LogEvent, TextFormat};
use crate::models::page::{NewPage, Page, PageSectionLink};
use crate::store::{is_sql_identifier, RecordStore, StoreTx};

const SAVEPOINT: &str = "subpage_step";

const COURSE_MODULE_SELECT: &str = r#"
    SELECT cm.id, cm.course, m.name AS module_name, cm.instance, cm.section
    FROM course_modules cm
    JOIN modules m ON m.id = cm.module
"#;

/// `RecordStore` backed by a Postgres pool. Each `begin` opens a real
/// database transaction; an uncommitted transaction rolls back on drop.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(FromRow)]
struct LinkedSectionRow {
    link_id: i64,
    subpage_id: i64,
    page_order: i32,
    stealth: bool,
    id: i64,
    course: i64,
    section: i32,
    name: Option<String>,
    summary: String,
    summary_format: TextFormat,
    sequence: Vec<i64>,
    visible: bool,
}

impl LinkedSectionRow {
    fn into_parts(self) -> (PageSectionLink, HostSection) {
        (
            PageSectionLink {
                id: self.link_id,
                subpage_id: self.subpage_id,
                section_id: self.id,
                page_order: self.page_order,
                stealth: self.stealth,
            },
            HostSection {
                id: self.id,
                course: self.course,
                section: self.section,
                name: self.name,
                summary: self.summary,
                summary_format: self.summary_format,
                sequence: self.sequence,
                visible: self.visible,
            },
        )
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError> {
        Ok(sqlx::query_as::<_, Course>(
            "SELECT id, fullname, format, cache_rev FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn lock_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError> {
        Ok(sqlx::query_as::<_, Course>(
            "SELECT id, fullname, format, cache_rev FROM courses WHERE id = $1 FOR UPDATE",
        )
        .bind(course_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn find_course_module(&mut self, cm_id: i64) -> Result<Option<CourseModule>, AppError> {
        Ok(
            sqlx::query_as::<_, CourseModule>(&format!("{COURSE_MODULE_SELECT} WHERE cm.id = $1"))
                .bind(cm_id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn find_section(&mut self, section_id: i64) -> Result<Option<HostSection>, AppError> {
        Ok(sqlx::query_as::<_, HostSection>(
            r#"
            SELECT id, course, section, name, summary, summary_format, sequence, visible
            FROM course_sections
            WHERE id = $1
            "#,
        )
        .bind(section_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn section_modules(&mut self, section_id: i64) -> Result<Vec<CourseModule>, AppError> {
        Ok(sqlx::query_as::<_, CourseModule>(&format!(
            "{COURSE_MODULE_SELECT} WHERE cm.section = $1 ORDER BY cm.id"
        ))
        .bind(section_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn count_section_modules(
        &mut self,
        course_id: i64,
        section_id: i64,
    ) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM course_modules WHERE course = $1 AND section = $2",
        )
        .bind(course_id)
        .bind(section_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn course_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError> {
        Ok(
            sqlx::query_scalar("SELECT section FROM course_sections WHERE course = $1")
                .bind(course_id)
                .fetch_all(&mut *self.tx)
                .await?,
        )
    }

    async fn create_section(
        &mut self,
        course_id: i64,
        number: i32,
    ) -> Result<HostSection, AppError> {
        Ok(sqlx::query_as::<_, HostSection>(
            r#"
            INSERT INTO course_sections (course, section)
            VALUES ($1, $2)
            RETURNING id, course, section, name, summary, summary_format, sequence, visible
            "#,
        )
        .bind(course_id)
        .bind(number)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn update_section_text(
        &mut self,
        section_id: i64,
        name: Option<&str>,
        summary: &str,
        summary_format: TextFormat,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE course_sections SET name = $2, summary = $3, summary_format = $4 WHERE id = $1",
        )
        .bind(section_id)
        .bind(name)
        .bind(summary)
        .bind(summary_format)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_section(&mut self, section_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM course_sections WHERE id = $1")
            .bind(section_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_instance_record(&mut self, table: &str, id: i64) -> Result<u64, AppError> {
        if !is_sql_identifier(table) {
            return Err(AppError::Validation(format!(
                "'{table}' is not a valid instance table name"
            )));
        }
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_module_files(&mut self, cm_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM files WHERE course_module_id = $1")
            .bind(cm_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_course_module(&mut self, cm_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM course_modules WHERE id = $1")
            .bind(cm_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn remove_from_sequence(&mut self, section_id: i64, cm_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE course_sections SET sequence = array_remove(sequence, $2) WHERE id = $1")
            .bind(section_id)
            .bind(cm_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_event(&mut self, event: &LogEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO log_events
                (event_name, user_id, course_id, course_module_id, other, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.event_name)
        .bind(event.user_id)
        .bind(event.course_id)
        .bind(event.course_module_id)
        .bind(&event.other)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn bump_cache_revision(&mut self, course_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE courses SET cache_rev = cache_rev + 1 WHERE id = $1")
            .bind(course_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_page(&mut self, page_id: i64) -> Result<Option<Page>, AppError> {
        Ok(sqlx::query_as::<_, Page>(
            "SELECT id, course, name, intro, intro_format, time_modified FROM subpages WHERE id = $1",
        )
        .bind(page_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_page(&mut self, page: &NewPage, now: DateTime<Utc>) -> Result<Page, AppError> {
        Ok(sqlx::query_as::<_, Page>(
            r#"
            INSERT INTO subpages (course, name, intro, intro_format, time_modified)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, course, name, intro, intro_format, time_modified
            "#,
        )
        .bind(page.course)
        .bind(&page.name)
        .bind(&page.intro)
        .bind(page.intro_format)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn update_page(&mut self, page: &Page) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE subpages
            SET name = $2, intro = $3, intro_format = $4, time_modified = $5
            WHERE id = $1
            "#,
        )
        .bind(page.id)
        .bind(&page.name)
        .bind(&page.intro)
        .bind(page.intro_format)
        .bind(page.time_modified)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_page(&mut self, page_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM subpages WHERE id = $1")
            .bind(page_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn page_links(&mut self, page_id: i64) -> Result<Vec<PageSectionLink>, AppError> {
        Ok(sqlx::query_as::<_, PageSectionLink>(
            r#"
            SELECT id, subpage_id, section_id, page_order, stealth
            FROM subpage_sections
            WHERE subpage_id = $1
            ORDER BY page_order, id
            "#,
        )
        .bind(page_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn page_sections(
        &mut self,
        page_id: i64,
    ) -> Result<Vec<(PageSectionLink, HostSection)>, AppError> {
        let rows = sqlx::query_as::<_, LinkedSectionRow>(
            r#"
            SELECT l.id AS link_id, l.subpage_id, l.page_order, l.stealth,
                   s.id, s.course, s.section, s.name, s.summary, s.summary_format,
                   s.sequence, s.visible
            FROM subpage_sections l
            JOIN course_sections s ON s.id = l.section_id
            WHERE l.subpage_id = $1
            ORDER BY l.page_order, l.id
            "#,
        )
        .bind(page_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(LinkedSectionRow::into_parts).collect())
    }

    async fn find_link(
        &mut self,
        page_id: i64,
        section_id: i64,
    ) -> Result<Option<PageSectionLink>, AppError> {
        Ok(sqlx::query_as::<_, PageSectionLink>(
            r#"
            SELECT id, subpage_id, section_id, page_order, stealth
            FROM subpage_sections
            WHERE subpage_id = $1 AND section_id = $2
            "#,
        )
        .bind(page_id)
        .bind(section_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn linked_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT DISTINCT s.section
            FROM course_sections s
            JOIN subpage_sections l ON l.section_id = s.id
            WHERE s.course = $1
            "#,
        )
        .bind(course_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_link(
        &mut self,
        page_id: i64,
        section_id: i64,
        page_order: i32,
        stealth: bool,
    ) -> Result<PageSectionLink, AppError> {
        Ok(sqlx::query_as::<_, PageSectionLink>(
            r#"
            INSERT INTO subpage_sections (subpage_id, section_id, page_order, stealth)
            VALUES ($1, $2, $3, $4)
            RETURNING id, subpage_id, section_id, page_order, stealth
            "#,
        )
        .bind(page_id)
        .bind(section_id)
        .bind(page_order)
        .bind(stealth)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn set_link_order(&mut self, link_id: i64, page_order: i32) -> Result<(), AppError> {
        sqlx::query("UPDATE subpage_sections SET page_order = $2 WHERE id = $1")
            .bind(link_id)
            .bind(page_order)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_link_stealth(&mut self, section_id: i64, stealth: bool) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE subpage_sections SET stealth = $2 WHERE section_id = $1")
            .bind(section_id)
            .bind(stealth)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_link(&mut self, link_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM subpage_sections WHERE id = $1")
            .bind(link_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), AppError> {
        sqlx::query(&format!("SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), AppError> {
        sqlx::query(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), AppError> {
        // ROLLBACK TO keeps the savepoint alive; release it so nesting stays flat.
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        self.release_savepoint().await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
