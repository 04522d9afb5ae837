use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tradeflow_shared::{
    AutomationDefinition, AutomationRun, OwnerSettings, RunStatus, StepDefinition, StepRun,
    StepRunStatus,
};
use uuid::Uuid;

use super::{AutomationStore, NewAutomation, StoreError, StoreResult, TaskEntry};
use crate::automations::RecordRef;

#[derive(Default)]
struct MemoryState {
    automations: HashMap<Uuid, AutomationDefinition>,
    owner_settings: HashMap<Uuid, OwnerSettings>,
    runs: HashMap<Uuid, AutomationRun>,
    step_runs: Vec<StepRun>,
    records: HashSet<RecordRef>,
    stages: HashMap<RecordRef, String>,
    tags: HashSet<(RecordRef, Uuid)>,
    tasks: Vec<TaskEntry>,
}

/// In-process store, used for tests and local runs without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_owner_settings(&self, settings: OwnerSettings) {
        self.state
            .write()
            .await
            .owner_settings
            .insert(settings.owner_id, settings);
    }

    /// Register a lead record that steps may update or tag.
    pub async fn put_record(&self, target: RecordRef) {
        self.state.write().await.records.insert(target);
    }

    pub async fn record_stage(&self, target: RecordRef) -> Option<String> {
        self.state.read().await.stages.get(&target).cloned()
    }

    pub async fn tags_for(&self, target: RecordRef) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .tags
            .iter()
            .filter(|(record, _)| *record == target)
            .map(|(_, tag)| *tag)
            .collect()
    }

    pub async fn tasks(&self) -> Vec<TaskEntry> {
        self.state.read().await.tasks.clone()
    }
}

fn sort_steps(steps: &mut [StepDefinition]) {
    steps.sort_by_key(|s| s.step_order);
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn create_automation(&self, automation: &NewAutomation) -> StoreResult<AutomationDefinition> {
        automation.check_ordinals()?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut steps: Vec<StepDefinition> = automation
            .steps
            .iter()
            .map(|s| StepDefinition {
                id: Uuid::new_v4(),
                automation_id: id,
                step_type: s.step_type.clone(),
                step_order: s.step_order,
                config: s.config.clone(),
                created_at: now,
            })
            .collect();
        sort_steps(&mut steps);

        let definition = AutomationDefinition {
            id,
            owner_id: automation.owner_id,
            name: automation.name.clone(),
            trigger_type: automation.trigger_type.clone(),
            is_active: automation.is_active,
            requires_confirmation: automation.requires_confirmation,
            created_at: now,
            updated_at: None,
            steps,
        };

        self.state
            .write()
            .await
            .automations
            .insert(id, definition.clone());
        Ok(definition)
    }

    async fn list_automations(&self, owner_id: Uuid) -> StoreResult<Vec<AutomationDefinition>> {
        let state = self.state.read().await;
        let mut automations: Vec<AutomationDefinition> = state
            .automations
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        automations.sort_by_key(|a| a.created_at);
        Ok(automations)
    }

    async fn get_automation(&self, automation_id: Uuid) -> StoreResult<Option<AutomationDefinition>> {
        Ok(self.state.read().await.automations.get(&automation_id).cloned())
    }

    async fn set_automation_active(&self, automation_id: Uuid, is_active: bool) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let automation = state
            .automations
            .get_mut(&automation_id)
            .ok_or_else(|| StoreError::NotFound(format!("Automation {}", automation_id)))?;
        automation.is_active = is_active;
        automation.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_automation(&self, automation_id: Uuid) -> StoreResult<()> {
        self.state
            .write()
            .await
            .automations
            .remove(&automation_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("Automation {}", automation_id)))
    }

    async fn active_automations(
        &self,
        owner_id: Uuid,
        trigger_type: &str,
    ) -> StoreResult<Vec<AutomationDefinition>> {
        let state = self.state.read().await;
        let mut matches: Vec<AutomationDefinition> = state
            .automations
            .values()
            .filter(|a| a.owner_id == owner_id && a.is_active && a.trigger_type == trigger_type)
            .cloned()
            .collect();
        matches.sort_by_key(|a| a.created_at);
        Ok(matches)
    }

    async fn get_owner_settings(&self, owner_id: Uuid) -> StoreResult<Option<OwnerSettings>> {
        Ok(self.state.read().await.owner_settings.get(&owner_id).cloned())
    }

    async fn create_run(&self, run: &AutomationRun) -> StoreResult<()> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<AutomationRun>> {
        Ok(self.state.read().await.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, owner_id: Uuid, status: Option<RunStatus>) -> StoreResult<Vec<AutomationRun>> {
        let state = self.state.read().await;
        let mut runs: Vec<AutomationRun> = state
            .runs
            .values()
            .filter(|r| r.owner_id == owner_id && status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn transition_run(&self, run_id: Uuid, from: RunStatus, to: RunStatus) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;

        if run.status != from {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = to;
        if to == RunStatus::Running {
            run.started_at = Some(now);
        }
        if to.is_terminal() {
            run.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn finish_run(&self, run_id: Uuid, status: RunStatus, error: Option<&str>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;

        if run.status != RunStatus::Running {
            return Err(StoreError::Invalid(format!(
                "run {} is {}, cannot finish as {}",
                run_id, run.status, status
            )));
        }

        run.status = status;
        run.error_message = error.map(str::to_string);
        run.resume_at = None;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn save_rendered_steps(&self, run_id: Uuid, steps: &serde_json::Value) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;
        run.rendered_steps = Some(steps.clone());
        Ok(())
    }

    async fn suspend_run(
        &self,
        run_id: Uuid,
        resume_at: DateTime<Utc>,
        after_ordinal: i32,
        snapshot: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;

        run.resume_at = Some(resume_at);
        run.resume_after_ordinal = Some(after_ordinal);
        if let Some(snapshot) = snapshot {
            run.rendered_steps = Some(snapshot.clone());
        }
        Ok(())
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<AutomationRun>> {
        let state = self.state.read().await;
        let mut due: Vec<AutomationRun> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.resume_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.resume_at);
        Ok(due)
    }

    async fn claim_resume(&self, run_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.runs.get_mut(&run_id) {
            Some(run) if run.status == RunStatus::Running && run.resume_at.is_some() => {
                run.resume_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_step_run(&self, step_run: &StepRun) -> StoreResult<()> {
        self.state.write().await.step_runs.push(step_run.clone());
        Ok(())
    }

    async fn finish_step_run(
        &self,
        step_run_id: Uuid,
        status: StepRunStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let step_run = state
            .step_runs
            .iter_mut()
            .find(|s| s.id == step_run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Step run {}", step_run_id)))?;

        step_run.status = status;
        step_run.error_message = error.map(str::to_string);
        step_run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_step_runs(&self, run_id: Uuid) -> StoreResult<Vec<StepRun>> {
        let state = self.state.read().await;
        let mut step_runs: Vec<StepRun> = state
            .step_runs
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        step_runs.sort_by_key(|s| s.step_order);
        Ok(step_runs)
    }

    async fn update_record_stage(&self, target: RecordRef, stage: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.records.contains(&target) {
            return Err(StoreError::NotFound(format!("{:?}", target)));
        }
        state.stages.insert(target, stage.to_string());
        Ok(())
    }

    async fn add_record_tag(&self, target: RecordRef, tag_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.records.contains(&target) {
            return Err(StoreError::NotFound(format!("{:?}", target)));
        }
        state.tags.insert((target, tag_id));
        Ok(())
    }

    async fn record_task(&self, task: &TaskEntry) -> StoreResult<()> {
        self.state.write().await.tasks.push(task.clone());
        Ok(())
    }
}
