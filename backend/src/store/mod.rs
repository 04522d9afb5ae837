//! Automation persistence.
//!
//! [`AutomationStore`] is the contract the engine persists through:
//! definitions and their ordered steps, runs and step runs, owner settings,
//! and the two record mutations steps perform (stage updates and tags).
//! [`PgAutomationStore`] backs production; [`MemoryStore`] has the same
//! semantics in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAutomationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tradeflow_shared::{
    AutomationDefinition, AutomationRun, OwnerSettings, RunStatus, StepRun, StepRunStatus,
};
use uuid::Uuid;

use crate::automations::RecordRef;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub step_type: String,
    pub step_order: i32,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAutomation {
    pub owner_id: Uuid,
    pub name: String,
    pub trigger_type: String,
    pub is_active: bool,
    pub requires_confirmation: bool,
    pub steps: Vec<NewStep>,
}

impl NewAutomation {
    /// Step ordinals must be unique within one automation.
    pub fn check_ordinals(&self) -> StoreResult<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_order) {
                return Err(StoreError::Invalid(format!(
                    "duplicate step_order {} in automation '{}'",
                    step.step_order, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A follow-up task logged by a `create_task` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub target: Option<RecordRef>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    // ===== Definitions =====

    async fn create_automation(&self, automation: &NewAutomation) -> StoreResult<AutomationDefinition>;

    async fn list_automations(&self, owner_id: Uuid) -> StoreResult<Vec<AutomationDefinition>>;

    /// Load one automation with its steps in ordinal order.
    async fn get_automation(&self, automation_id: Uuid) -> StoreResult<Option<AutomationDefinition>>;

    async fn set_automation_active(&self, automation_id: Uuid, is_active: bool) -> StoreResult<()>;

    async fn delete_automation(&self, automation_id: Uuid) -> StoreResult<()>;

    /// Active automations of `owner_id` listening for `trigger_type`, with steps.
    async fn active_automations(
        &self,
        owner_id: Uuid,
        trigger_type: &str,
    ) -> StoreResult<Vec<AutomationDefinition>>;

    async fn get_owner_settings(&self, owner_id: Uuid) -> StoreResult<Option<OwnerSettings>>;

    // ===== Runs =====

    async fn create_run(&self, run: &AutomationRun) -> StoreResult<()>;

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<AutomationRun>>;

    async fn list_runs(&self, owner_id: Uuid, status: Option<RunStatus>) -> StoreResult<Vec<AutomationRun>>;

    /// Compare-and-set status change. Returns false if the run was not in `from`.
    async fn transition_run(&self, run_id: Uuid, from: RunStatus, to: RunStatus) -> StoreResult<bool>;

    /// Move a running run to a terminal status.
    async fn finish_run(&self, run_id: Uuid, status: RunStatus, error: Option<&str>) -> StoreResult<()>;

    async fn save_rendered_steps(&self, run_id: Uuid, steps: &serde_json::Value) -> StoreResult<()>;

    /// Park a running run until `resume_at`. `snapshot` replaces the stored
    /// rendered steps when given.
    async fn suspend_run(
        &self,
        run_id: Uuid,
        resume_at: DateTime<Utc>,
        after_ordinal: i32,
        snapshot: Option<&serde_json::Value>,
    ) -> StoreResult<()>;

    /// Running runs whose resume time is at or before `now`.
    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<AutomationRun>>;

    /// Clear the resume marker of a due run. Only one caller wins.
    async fn claim_resume(&self, run_id: Uuid) -> StoreResult<bool>;

    // ===== Step runs =====

    async fn create_step_run(&self, step_run: &StepRun) -> StoreResult<()>;

    async fn finish_step_run(
        &self,
        step_run_id: Uuid,
        status: StepRunStatus,
        error: Option<&str>,
    ) -> StoreResult<()>;

    async fn list_step_runs(&self, run_id: Uuid) -> StoreResult<Vec<StepRun>>;

    // ===== Record mutations =====

    /// Fails with `NotFound` when the record does not exist.
    async fn update_record_stage(&self, target: RecordRef, stage: &str) -> StoreResult<()>;

    /// Associate a tag. An existing association is left as is; a missing
    /// record is `NotFound`.
    async fn add_record_tag(&self, target: RecordRef, tag_id: Uuid) -> StoreResult<()>;

    async fn record_task(&self, task: &TaskEntry) -> StoreResult<()>;
}
