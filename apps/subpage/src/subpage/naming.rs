use std::collections::HashMap;
use std::sync::Arc;

use crate::models::course::HostSection;

/// Course-format section naming callback.
pub trait SectionNamer: Send + Sync {
    fn section_name(&self, section: &HostSection) -> String;
}

/// `topics` format: the section's own name, else "Topic N".
pub struct TopicsNamer;

impl SectionNamer for TopicsNamer {
    fn section_name(&self, section: &HostSection) -> String {
        custom_name(section).unwrap_or_else(|| format!("Topic {}", section.section))
    }
}

/// Course format → namer, built once at startup.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    namers: HashMap<String, Arc<dyn SectionNamer>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in format namers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("topics", Arc::new(TopicsNamer));
        registry
    }

    pub fn register(&mut self, format: &str, namer: Arc<dyn SectionNamer>) {
        self.namers.insert(format.to_string(), namer);
    }

    /// Display name for `section` in a course using `format`.
    pub fn display_name(&self, format: &str, section: &HostSection) -> String {
        match self.namers.get(format) {
            Some(namer) => namer.section_name(section),
            None => custom_name(section).unwrap_or_else(|| format!("Section {}", section.section)),
        }
    }
}

fn custom_name(section: &HostSection) -> Option<String> {
    section
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
