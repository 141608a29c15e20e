//! Host module deletion lifecycle.
//!
//! Removing a course module is a fixed series of steps. Each step runs under
//! its own savepoint: a failing step is rolled back on its own and reported as
//! a `ModuleDeletionWarning`, and the remaining steps still run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::course::{CourseModule, LogEvent};
use crate::store::{is_sql_identifier, StoreTx};

/// Per-module-type instance deletion hook.
#[async_trait]
pub trait ModuleDeletionHook: Send + Sync {
    async fn delete_instance(&self, tx: &mut dyn StoreTx, instance_id: i64) -> Result<(), AppError>;
}

/// Hook for module types whose instance is a row in a table named after the type.
pub struct TableInstanceHook {
    table: String,
}

impl TableInstanceHook {
    pub fn new(table: &str) -> Result<Self, AppError> {
        if !is_sql_identifier(table) {
            return Err(AppError::Validation(format!(
                "'{table}' is not a valid module table name"
            )));
        }
        Ok(Self {
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl ModuleDeletionHook for TableInstanceHook {
    async fn delete_instance(&self, tx: &mut dyn StoreTx, instance_id: i64) -> Result<(), AppError> {
        let deleted = tx.delete_instance_record(&self.table, instance_id).await?;
        if deleted == 0 {
            return Err(AppError::NotFound(format!(
                "{} instance {instance_id} not found",
                self.table
            )));
        }
        Ok(())
    }
}

/// Module type name → deletion hook, built once at startup.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    hooks: HashMap<String, Arc<dyn ModuleDeletionHook>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `TableInstanceHook` for each module type name.
    pub fn with_tables<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, AppError> {
        let mut registry = Self::new();
        for name in names {
            registry.register(name, Arc::new(TableInstanceHook::new(name)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, module_name: &str, hook: Arc<dyn ModuleDeletionHook>) {
        self.hooks.insert(module_name.to_string(), hook);
    }

    pub fn get(&self, module_name: &str) -> Option<Arc<dyn ModuleDeletionHook>> {
        self.hooks.get(module_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStep {
    InstanceHook,
    Files,
    Record,
    Sequence,
    Event,
}

impl DeletionStep {
    const ALL: [DeletionStep; 5] = [
        DeletionStep::InstanceHook,
        DeletionStep::Files,
        DeletionStep::Record,
        DeletionStep::Sequence,
        DeletionStep::Event,
    ];
}

/// Non-fatal failure while deleting a course module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDeletionWarning {
    pub course_module_id: i64,
    pub module_name: String,
    pub step: DeletionStep,
    pub message: String,
}

/// Runs every deletion step for `cm` inside `tx`. Only savepoint control
/// failures are returned as errors; step failures come back as warnings.
///
/// The course cache revision is not bumped here; callers bump it once per
/// batch of deleted modules.
pub async fn delete_course_module(
    tx: &mut dyn StoreTx,
    registry: &ModuleRegistry,
    cm: &CourseModule,
    actor: i64,
) -> Result<Vec<ModuleDeletionWarning>, AppError> {
    let mut warnings = Vec::new();

    for step in DeletionStep::ALL {
        tx.savepoint().await?;
        match run_step(tx, registry, cm, actor, step).await {
            Ok(()) => tx.release_savepoint().await?,
            Err(e) => {
                tx.rollback_to_savepoint().await?;
                warn!(
                    course_module = cm.id,
                    module = %cm.module_name,
                    ?step,
                    "Module deletion step failed: {e}"
                );
                warnings.push(ModuleDeletionWarning {
                    course_module_id: cm.id,
                    module_name: cm.module_name.clone(),
                    step,
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "Deleted course module {} ({}) with {} warning(s)",
        cm.id,
        cm.module_name,
        warnings.len()
    );
    Ok(warnings)
}

async fn run_step(
    tx: &mut dyn StoreTx,
    registry: &ModuleRegistry,
    cm: &CourseModule,
    actor: i64,
    step: DeletionStep,
) -> Result<(), AppError> {
    match step {
        DeletionStep::InstanceHook => {
            let hook = registry.get(&cm.module_name).ok_or_else(|| {
                AppError::NotFound(format!("no deletion handler for module type '{}'", cm.module_name))
            })?;
            hook.delete_instance(tx, cm.instance).await
        }
        DeletionStep::Files => tx.delete_module_files(cm.id).await.map(|_| ()),
        DeletionStep::Record => {
            if tx.delete_course_module(cm.id).await? == 0 {
                return Err(AppError::NotFound(format!(
                    "Course module {} not found",
                    cm.id
                )));
            }
            Ok(())
        }
        DeletionStep::Sequence => tx.remove_from_sequence(cm.section, cm.id).await,
        DeletionStep::Event => {
            tx.insert_event(&LogEvent {
                event_name: "course_module_deleted".to_string(),
                user_id: actor,
                course_id: cm.course,
                course_module_id: Some(cm.id),
                other: json!({
                    "module_name": cm.module_name,
                    "instance_id": cm.instance,
                }),
                created_at: Utc::now(),
            })
            .await
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
