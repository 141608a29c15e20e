use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::AppError;
use crate::models::course::{Course, CourseModule, HostSection, LogEvent, TextFormat};
use crate::models::page::{NewPage, Page, PageSectionLink};
use crate::store::{RecordStore, StoreTx};

/// Whole-database image held by `MemoryStore`.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub courses: BTreeMap<i64, Course>,
    pub course_modules: BTreeMap<i64, CourseModule>,
    pub sections: BTreeMap<i64, HostSection>,
    pub pages: BTreeMap<i64, Page>,
    pub links: BTreeMap<i64, PageSectionLink>,
    /// file id → owning course module id
    pub files: BTreeMap<i64, i64>,
    /// module type → instance ids
    pub instances: BTreeMap<String, BTreeSet<i64>>,
    pub events: Vec<LogEvent>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Page order values of a page's links, in page order.
    pub fn orders(&self, page_id: i64) -> Vec<i32> {
        let mut orders: Vec<i32> = self
            .links
            .values()
            .filter(|l| l.subpage_id == page_id)
            .map(|l| l.page_order)
            .collect();
        orders.sort_unstable();
        orders
    }

    /// Section ids of a page's links, in page order.
    pub fn section_order(&self, page_id: i64) -> Vec<i64> {
        let mut links: Vec<&PageSectionLink> = self
            .links
            .values()
            .filter(|l| l.subpage_id == page_id)
            .collect();
        links.sort_by_key(|l| (l.page_order, l.id));
        links.iter().map(|l| l.section_id).collect()
    }
}

/// In-memory `RecordStore`. A transaction works on a private copy of the
/// state and replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failures: Arc<Mutex<BTreeSet<&'static str>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Makes every later call to the named `StoreTx` operation fail.
    pub async fn fail_on(&self, op: &'static str) {
        self.failures.lock().await.insert(op);
    }

    pub async fn add_course(&self, fullname: &str, format: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.courses.insert(
            id,
            Course {
                id,
                fullname: fullname.to_string(),
                format: format.to_string(),
                cache_rev: 0,
            },
        );
        id
    }

    pub async fn add_section(&self, course: i64, number: i32) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.sections.insert(id, empty_section(id, course, number));
        id
    }

    /// Places a module of type `module_name` in a section, with one stored file.
    pub async fn add_module(&self, course: i64, section_id: i64, module_name: &str) -> i64 {
        let mut state = self.state.lock().await;
        let instance = state.next_id();
        state
            .instances
            .entry(module_name.to_string())
            .or_default()
            .insert(instance);
        let id = state.next_id();
        state.course_modules.insert(
            id,
            CourseModule {
                id,
                course,
                module_name: module_name.to_string(),
                instance,
                section: section_id,
            },
        );
        if let Some(section) = state.sections.get_mut(&section_id) {
            section.sequence.push(id);
        }
        let file_id = state.next_id();
        state.files.insert(file_id, id);
        id
    }

    pub async fn add_page(&self, course: i64, name: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.pages.insert(
            id,
            Page {
                id,
                course,
                name: name.to_string(),
                intro: String::new(),
                intro_format: TextFormat::Html,
                time_modified: Utc::now(),
            },
        );
        id
    }

    /// Registers a page's own course module (module type `subpage`).
    pub async fn add_page_module(&self, course: i64, page_id: i64, section_id: i64) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.course_modules.insert(
            id,
            CourseModule {
                id,
                course,
                module_name: "subpage".to_string(),
                instance: page_id,
                section: section_id,
            },
        );
        id
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            state: self.state.lock().await.clone(),
            savepoints: Vec::new(),
            failures: self.failures.lock().await.clone(),
        }))
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    state: MemoryState,
    savepoints: Vec<MemoryState>,
    failures: BTreeSet<&'static str>,
}

impl MemoryTx {
    fn check(&self, op: &'static str) -> Result<(), AppError> {
        if self.failures.contains(op) {
            return Err(AppError::Internal(anyhow!("injected failure in {op}")));
        }
        Ok(())
    }
}

fn empty_section(id: i64, course: i64, number: i32) -> HostSection {
    HostSection {
        id,
        course,
        section: number,
        name: None,
        summary: String::new(),
        summary_format: TextFormat::Html,
        sequence: Vec::new(),
        visible: true,
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError> {
        self.check("find_course")?;
        Ok(self.state.courses.get(&course_id).cloned())
    }

    async fn lock_course(&mut self, course_id: i64) -> Result<Option<Course>, AppError> {
        self.check("lock_course")?;
        Ok(self.state.courses.get(&course_id).cloned())
    }

    async fn find_course_module(&mut self, cm_id: i64) -> Result<Option<CourseModule>, AppError> {
        self.check("find_course_module")?;
        Ok(self.state.course_modules.get(&cm_id).cloned())
    }

    async fn find_section(&mut self, section_id: i64) -> Result<Option<HostSection>, AppError> {
        self.check("find_section")?;
        Ok(self.state.sections.get(&section_id).cloned())
    }

    async fn section_modules(&mut self, section_id: i64) -> Result<Vec<CourseModule>, AppError> {
        self.check("section_modules")?;
        Ok(self
            .state
            .course_modules
            .values()
            .filter(|cm| cm.section == section_id)
            .cloned()
            .collect())
    }

    async fn count_section_modules(
        &mut self,
        course_id: i64,
        section_id: i64,
    ) -> Result<i64, AppError> {
        self.check("count_section_modules")?;
        Ok(self
            .state
            .course_modules
            .values()
            .filter(|cm| cm.course == course_id && cm.section == section_id)
            .count() as i64)
    }

    async fn course_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError> {
        self.check("course_section_numbers")?;
        Ok(self
            .state
            .sections
            .values()
            .filter(|s| s.course == course_id)
            .map(|s| s.section)
            .collect())
    }

    async fn create_section(
        &mut self,
        course_id: i64,
        number: i32,
    ) -> Result<HostSection, AppError> {
        self.check("create_section")?;
        if self
            .state
            .sections
            .values()
            .any(|s| s.course == course_id && s.section == number)
        {
            return Err(AppError::Internal(anyhow!(
                "duplicate section number {number} in course {course_id}"
            )));
        }
        let id = self.state.next_id();
        let section = empty_section(id, course_id, number);
        self.state.sections.insert(id, section.clone());
        Ok(section)
    }

    async fn update_section_text(
        &mut self,
        section_id: i64,
        name: Option<&str>,
        summary: &str,
        summary_format: TextFormat,
    ) -> Result<(), AppError> {
        self.check("update_section_text")?;
        if let Some(section) = self.state.sections.get_mut(&section_id) {
            section.name = name.map(str::to_string);
            section.summary = summary.to_string();
            section.summary_format = summary_format;
        }
        Ok(())
    }

    async fn delete_section(&mut self, section_id: i64) -> Result<(), AppError> {
        self.check("delete_section")?;
        let referenced = self.state.links.values().any(|l| l.section_id == section_id)
            || self
                .state
                .course_modules
                .values()
                .any(|cm| cm.section == section_id);
        if referenced {
            return Err(AppError::Internal(anyhow!(
                "section {section_id} is still referenced"
            )));
        }
        self.state.sections.remove(&section_id);
        Ok(())
    }

    async fn delete_instance_record(&mut self, table: &str, id: i64) -> Result<u64, AppError> {
        self.check("delete_instance_record")?;
        let removed = self
            .state
            .instances
            .get_mut(table)
            .is_some_and(|ids| ids.remove(&id));
        Ok(u64::from(removed))
    }

    async fn delete_module_files(&mut self, cm_id: i64) -> Result<u64, AppError> {
        self.check("delete_module_files")?;
        let before = self.state.files.len();
        self.state.files.retain(|_, owner| *owner != cm_id);
        Ok((before - self.state.files.len()) as u64)
    }

    async fn delete_course_module(&mut self, cm_id: i64) -> Result<u64, AppError> {
        self.check("delete_course_module")?;
        Ok(u64::from(self.state.course_modules.remove(&cm_id).is_some()))
    }

    async fn remove_from_sequence(&mut self, section_id: i64, cm_id: i64) -> Result<(), AppError> {
        self.check("remove_from_sequence")?;
        if let Some(section) = self.state.sections.get_mut(&section_id) {
            section.sequence.retain(|id| *id != cm_id);
        }
        Ok(())
    }

    async fn insert_event(&mut self, event: &LogEvent) -> Result<(), AppError> {
        self.check("insert_event")?;
        self.state.events.push(event.clone());
        Ok(())
    }

    async fn bump_cache_revision(&mut self, course_id: i64) -> Result<(), AppError> {
        self.check("bump_cache_revision")?;
        if let Some(course) = self.state.courses.get_mut(&course_id) {
            course.cache_rev += 1;
        }
        Ok(())
    }

    async fn find_page(&mut self, page_id: i64) -> Result<Option<Page>, AppError> {
        self.check("find_page")?;
        Ok(self.state.pages.get(&page_id).cloned())
    }

    async fn insert_page(&mut self, page: &NewPage, now: DateTime<Utc>) -> Result<Page, AppError> {
        self.check("insert_page")?;
        let id = self.state.next_id();
        let row = Page {
            id,
            course: page.course,
            name: page.name.clone(),
            intro: page.intro.clone(),
            intro_format: page.intro_format,
            time_modified: now,
        };
        self.state.pages.insert(id, row.clone());
        Ok(row)
    }

    async fn update_page(&mut self, page: &Page) -> Result<(), AppError> {
        self.check("update_page")?;
        if let Some(row) = self.state.pages.get_mut(&page.id) {
            *row = page.clone();
        }
        Ok(())
    }

    async fn delete_page(&mut self, page_id: i64) -> Result<(), AppError> {
        self.check("delete_page")?;
        if self.state.links.values().any(|l| l.subpage_id == page_id) {
            return Err(AppError::Internal(anyhow!("page {page_id} still has links")));
        }
        self.state.pages.remove(&page_id);
        Ok(())
    }

    async fn page_links(&mut self, page_id: i64) -> Result<Vec<PageSectionLink>, AppError> {
        self.check("page_links")?;
        let mut links: Vec<PageSectionLink> = self
            .state
            .links
            .values()
            .filter(|l| l.subpage_id == page_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.page_order, l.id));
        Ok(links)
    }

    async fn page_sections(
        &mut self,
        page_id: i64,
    ) -> Result<Vec<(PageSectionLink, HostSection)>, AppError> {
        self.check("page_sections")?;
        let links = self.page_links(page_id).await?;
        Ok(links
            .into_iter()
            .filter_map(|link| {
                let section = self.state.sections.get(&link.section_id)?.clone();
                Some((link, section))
            })
            .collect())
    }

    async fn find_link(
        &mut self,
        page_id: i64,
        section_id: i64,
    ) -> Result<Option<PageSectionLink>, AppError> {
        self.check("find_link")?;
        Ok(self
            .state
            .links
            .values()
            .find(|l| l.subpage_id == page_id && l.section_id == section_id)
            .cloned())
    }

    async fn linked_section_numbers(&mut self, course_id: i64) -> Result<Vec<i32>, AppError> {
        self.check("linked_section_numbers")?;
        let numbers: BTreeSet<i32> = self
            .state
            .links
            .values()
            .filter_map(|l| self.state.sections.get(&l.section_id))
            .filter(|s| s.course == course_id)
            .map(|s| s.section)
            .collect();
        Ok(numbers.into_iter().collect())
    }

    async fn insert_link(
        &mut self,
        page_id: i64,
        section_id: i64,
        page_order: i32,
        stealth: bool,
    ) -> Result<PageSectionLink, AppError> {
        self.check("insert_link")?;
        if self
            .state
            .links
            .values()
            .any(|l| l.subpage_id == page_id && l.section_id == section_id)
        {
            return Err(AppError::Internal(anyhow!(
                "section {section_id} already linked to page {page_id}"
            )));
        }
        let id = self.state.next_id();
        let link = PageSectionLink {
            id,
            subpage_id: page_id,
            section_id,
            page_order,
            stealth,
        };
        self.state.links.insert(id, link.clone());
        Ok(link)
    }

    async fn set_link_order(&mut self, link_id: i64, page_order: i32) -> Result<(), AppError> {
        self.check("set_link_order")?;
        if let Some(link) = self.state.links.get_mut(&link_id) {
            link.page_order = page_order;
        }
        Ok(())
    }

    async fn set_link_stealth(&mut self, section_id: i64, stealth: bool) -> Result<u64, AppError> {
        self.check("set_link_stealth")?;
        let mut updated = 0;
        for link in self
            .state
            .links
            .values_mut()
            .filter(|l| l.section_id == section_id)
        {
            link.stealth = stealth;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_link(&mut self, link_id: i64) -> Result<(), AppError> {
        self.check("delete_link")?;
        self.state.links.remove(&link_id);
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), AppError> {
        self.savepoints.push(self.state.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), AppError> {
        self.savepoints.pop();
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), AppError> {
        let saved = self
            .savepoints
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow!("no active savepoint")))?;
        self.state = saved;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { shared, state, .. } = *self;
        *shared.lock().await = state;
        Ok(())
    }
}
