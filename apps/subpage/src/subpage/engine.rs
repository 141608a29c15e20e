//! Subpage ordering engine.
//!
//! Owns the page → section links of every subpage: section-number allocation
//! out of the reserved band, dense `page_order` maintenance, and section
//! deletion through the host module lifecycle.
//!
//! Every mutation runs in one store transaction and locks the owning course
//! row first, so concurrent requests on a course serialize. A failure at any
//! point drops the transaction and leaves no partial state behind.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::course::{Course, TextFormat};
use crate::models::page::{LoadedPage, NewPage, Page, PageSection, PageSectionLink, PageUpdate};
use crate::store::{RecordStore, StoreTx};
use crate::subpage::lifecycle::{delete_course_module, ModuleDeletionWarning, ModuleRegistry};
use crate::subpage::naming::FormatRegistry;
use crate::subpage::ordering::{
    append_order, densify_plan, move_plan, next_section_number, OrderChange, SECTION_NUMBER_MAX,
};

/// Module type name under which pages are registered as course modules.
pub const MODULE_NAME: &str = "subpage";

/// Result of `add_section`.
#[derive(Debug, Clone, Serialize)]
pub struct AddedSection {
    pub link_id: i64,
    pub section_id: i64,
    pub section_number: i32,
    pub page_order: i32,
}

pub struct SubpageEngine {
    store: Arc<dyn RecordStore>,
    modules: ModuleRegistry,
    formats: FormatRegistry,
}

impl SubpageEngine {
    pub fn new(store: Arc<dyn RecordStore>, modules: ModuleRegistry, formats: FormatRegistry) -> Self {
        Self {
            store,
            modules,
            formats,
        }
    }

    // ── Pages ───────────────────────────────────────────────────────────────

    /// Resolves a course module to its page and owning course.
    pub async fn load_page(&self, cm_id: i64) -> Result<LoadedPage, AppError> {
        let mut tx = self.store.begin().await?;

        let course_module = tx
            .find_course_module(cm_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Course module {cm_id} not found")))?;
        if course_module.module_name != MODULE_NAME {
            return Err(AppError::NotFound(format!(
                "Course module {cm_id} is a '{}', not a subpage",
                course_module.module_name
            )));
        }
        let page = require_page(tx.as_mut(), course_module.instance).await?;
        let course = require_course(tx.as_mut(), page.course, false).await?;

        Ok(LoadedPage {
            course_module,
            page,
            course,
        })
    }

    pub async fn create_page(&self, new_page: NewPage) -> Result<Page, AppError> {
        let name = new_page.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Page name must not be empty".to_string()));
        }
        let new_page = NewPage {
            name: name.to_string(),
            ..new_page
        };

        let mut tx = self.store.begin().await?;
        require_course(tx.as_mut(), new_page.course, false).await?;
        let page = tx.insert_page(&new_page, Utc::now()).await?;
        tx.commit().await?;

        info!("Created page {} in course {}", page.id, page.course);
        Ok(page)
    }

    pub async fn update_page(&self, page_id: i64, update: PageUpdate) -> Result<Page, AppError> {
        let mut tx = self.store.begin().await?;
        let mut page = require_page(tx.as_mut(), page_id).await?;

        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::Validation("Page name must not be empty".to_string()));
            }
            page.name = name.to_string();
        }
        if let Some(intro) = update.intro {
            page.intro = intro;
        }
        if let Some(intro_format) = update.intro_format {
            page.intro_format = intro_format;
        }
        page.time_modified = Utc::now();

        tx.update_page(&page).await?;
        tx.commit().await?;

        info!("Updated page {page_id}");
        Ok(page)
    }

    /// Deletes every section of the page, then the page itself.
    pub async fn delete_page(
        &self,
        page_id: i64,
        actor: i64,
    ) -> Result<Vec<ModuleDeletionWarning>, AppError> {
        let mut tx = self.store.begin().await?;
        let page = require_page(tx.as_mut(), page_id).await?;
        require_course(tx.as_mut(), page.course, true).await?;

        let mut warnings = Vec::new();
        for link in tx.page_links(page_id).await? {
            warnings.extend(self.remove_section(tx.as_mut(), &link, actor).await?);
        }
        tx.delete_page(page_id).await?;
        tx.commit().await?;

        info!(
            "Deleted page {page_id} from course {} ({} warning(s))",
            page.course,
            warnings.len()
        );
        Ok(warnings)
    }

    // ── Sections ────────────────────────────────────────────────────────────

    /// Sections of a page in `page_order`, with display names.
    pub async fn list_sections(&self, page_id: i64) -> Result<Vec<PageSection>, AppError> {
        let mut tx = self.store.begin().await?;
        let page = require_page(tx.as_mut(), page_id).await?;
        let course = require_course(tx.as_mut(), page.course, false).await?;

        Ok(tx
            .page_sections(page_id)
            .await?
            .into_iter()
            .map(|(link, section)| PageSection {
                link_id: link.id,
                page_order: link.page_order,
                stealth: link.stealth,
                display_name: self.formats.display_name(&course.format, &section),
                section,
            })
            .collect())
    }

    /// The number the next `add_section` in this course would use.
    pub async fn allocate_section_number(&self, course_id: i64) -> Result<i32, AppError> {
        let mut tx = self.store.begin().await?;
        require_course(tx.as_mut(), course_id, false).await?;
        allocate(tx.as_mut(), course_id).await
    }

    /// Creates a host section in the reserved band and appends it to the page.
    pub async fn add_section(
        &self,
        page_id: i64,
        name: Option<&str>,
        summary: Option<&str>,
    ) -> Result<AddedSection, AppError> {
        let mut tx = self.store.begin().await?;
        let page = require_page(tx.as_mut(), page_id).await?;
        require_course(tx.as_mut(), page.course, true).await?;

        let number = allocate(tx.as_mut(), page.course).await?;
        let section = tx.create_section(page.course, number).await?;

        if name.is_some() || summary.is_some() {
            let name = name.map(str::trim).filter(|n| !n.is_empty());
            tx.update_section_text(section.id, name, summary.unwrap_or_default(), TextFormat::Html)
                .await?;
        }

        let page_order = append_order(&tx.page_links(page_id).await?);
        let link = tx.insert_link(page_id, section.id, page_order, false).await?;
        tx.commit().await?;

        info!(
            "Added section {} (number {number}) to page {page_id} at position {page_order}",
            section.id
        );
        Ok(AddedSection {
            link_id: link.id,
            section_id: section.id,
            section_number: number,
            page_order,
        })
    }

    /// Moves a section to `target_order` (clamped to the page's range).
    pub async fn move_section(
        &self,
        page_id: i64,
        section_id: i64,
        target_order: i32,
    ) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        let page = require_page(tx.as_mut(), page_id).await?;
        require_course(tx.as_mut(), page.course, true).await?;

        let links = tx.page_links(page_id).await?;
        let changes = move_plan(&links, section_id, target_order).ok_or_else(|| {
            AppError::NotFound(format!("Section {section_id} is not on page {page_id}"))
        })?;
        write_orders(tx.as_mut(), &changes).await?;
        tx.commit().await?;

        info!(
            "Moved section {section_id} on page {page_id} to position {target_order} ({} write(s))",
            changes.len()
        );
        Ok(())
    }

    /// Deletes a section and its modules from a page, then closes the gap in
    /// `page_order`. Module deletion failures come back as warnings.
    pub async fn delete_section(
        &self,
        page_id: i64,
        section_id: i64,
        actor: i64,
    ) -> Result<Vec<ModuleDeletionWarning>, AppError> {
        let mut tx = self.store.begin().await?;
        let page = require_page(tx.as_mut(), page_id).await?;
        require_course(tx.as_mut(), page.course, true).await?;

        let link = tx.find_link(page_id, section_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Section {section_id} is not on page {page_id}"))
        })?;
        let warnings = self.remove_section(tx.as_mut(), &link, actor).await?;

        let remaining = tx.page_links(page_id).await?;
        write_orders(tx.as_mut(), &densify_plan(&remaining)).await?;
        tx.commit().await?;

        info!(
            "Deleted section {section_id} from page {page_id} ({} warning(s))",
            warnings.len()
        );
        Ok(warnings)
    }

    pub async fn set_stealth(&self, section_id: i64, stealth: bool) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        if tx.set_link_stealth(section_id, stealth).await? == 0 {
            return Err(AppError::NotFound(format!(
                "Section {section_id} is not on any page"
            )));
        }
        tx.commit().await?;

        info!("Set stealth={stealth} on section {section_id}");
        Ok(())
    }

    pub async fn is_section_empty(&self, course_id: i64, section_id: i64) -> Result<bool, AppError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.count_section_modules(course_id, section_id).await? == 0)
    }

    /// Deletes the modules of a linked section, the link, and the section.
    /// Leaves `page_order` of the remaining links untouched.
    async fn remove_section(
        &self,
        tx: &mut dyn StoreTx,
        link: &PageSectionLink,
        actor: i64,
    ) -> Result<Vec<ModuleDeletionWarning>, AppError> {
        let modules = tx.section_modules(link.section_id).await?;

        let mut warnings = Vec::new();
        for cm in &modules {
            warnings.extend(delete_course_module(tx, &self.modules, cm, actor).await?);
        }
        if let Some(cm) = modules.first() {
            tx.bump_cache_revision(cm.course).await?;
        }
        if !warnings.is_empty() {
            warn!(
                "Section {} lost {} module(s) with {} warning(s)",
                link.section_id,
                modules.len(),
                warnings.len()
            );
        }

        tx.delete_link(link.id).await?;
        tx.delete_section(link.section_id).await?;
        Ok(warnings)
    }
}

async fn require_page(tx: &mut dyn StoreTx, page_id: i64) -> Result<Page, AppError> {
    tx.find_page(page_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Page {page_id} not found")))
}

async fn require_course(tx: &mut dyn StoreTx, course_id: i64, lock: bool) -> Result<Course, AppError> {
    let course = if lock {
        tx.lock_course(course_id).await?
    } else {
        tx.find_course(course_id).await?
    };
    course.ok_or_else(|| AppError::NotFound(format!("Course {course_id} not found")))
}

async fn allocate(tx: &mut dyn StoreTx, course_id: i64) -> Result<i32, AppError> {
    let linked = tx.linked_section_numbers(course_id).await?;
    let occupied = tx.course_section_numbers(course_id).await?;
    next_section_number(&linked, &occupied).ok_or(AppError::CapacityExceeded {
        course_id,
        max: SECTION_NUMBER_MAX,
    })
}

async fn write_orders(tx: &mut dyn StoreTx, changes: &[OrderChange]) -> Result<(), AppError> {
    for change in changes {
        tx.set_link_order(change.link_id, change.page_order).await?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
