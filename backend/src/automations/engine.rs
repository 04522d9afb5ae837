// Automation Engine - run lifecycle, confirmation flow and durable waits

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use tradeflow_shared::{
    AutomationDefinition, AutomationRun, OwnerSettings, RunStatus, StepRun, StepRunStatus,
};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::error::{EngineError, EngineResult};
use super::executor::{StepExecutor, StepOutcome};
use super::steps::{RenderedStep, StepEdit, render_all, snapshot_from_json, snapshot_to_json};
use crate::store::AutomationStore;

/// Where a run ended up after the engine stopped driving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub automation_id: Uuid,
    /// `Running` means the run is parked on a wait step until `resume_at`.
    pub status: RunStatus,
    pub resume_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct AutomationEngine {
    store: Arc<dyn AutomationStore>,
    executor: StepExecutor,
}

impl AutomationEngine {
    pub fn new(store: Arc<dyn AutomationStore>, executor: StepExecutor) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &Arc<dyn AutomationStore> {
        &self.store
    }

    /// Start a run in `running` and drive it until it finishes or hits a wait.
    pub async fn execute_automation(
        &self,
        automation: &AutomationDefinition,
        ctx: &ExecutionContext,
    ) -> EngineResult<RunSummary> {
        let owner = self.owner_settings(ctx.owner_id).await?;
        let ctx = ctx.clone().with_owner_business(&owner);

        let now = Utc::now();
        let run = new_run(automation, &ctx, RunStatus::Running, None, now);
        self.store.create_run(&run).await?;

        info!(
            "Automation run {} started for automation '{}' ({})",
            run.id, automation.name, automation.id
        );

        let steps = render_all(&automation.steps, self.executor.resolver(), &ctx);
        self.drive(&run, steps, &ctx).await
    }

    /// Pre-render every step of an automation and park the run for review.
    /// No side effect is performed.
    pub async fn create_pending_run(&self, automation_id: Uuid, ctx: &ExecutionContext) -> EngineResult<Uuid> {
        let automation = self
            .store
            .get_automation(automation_id)
            .await?
            .ok_or(EngineError::AutomationNotFound(automation_id))?;

        self.create_pending_run_for(&automation, ctx).await
    }

    pub(crate) async fn create_pending_run_for(
        &self,
        automation: &AutomationDefinition,
        ctx: &ExecutionContext,
    ) -> EngineResult<Uuid> {
        let owner = self.owner_settings(ctx.owner_id).await?;
        let ctx = ctx.clone().with_owner_business(&owner);

        let steps = render_all(&automation.steps, self.executor.resolver(), &ctx);
        let snapshot = snapshot_to_json(&steps)?;

        let run = new_run(
            automation,
            &ctx,
            RunStatus::PendingConfirmation,
            Some(snapshot),
            Utc::now(),
        );
        self.store.create_run(&run).await?;

        info!(
            "Automation run {} awaiting confirmation ({} steps rendered)",
            run.id,
            steps.len()
        );
        Ok(run.id)
    }

    /// Execute a pending run from its snapshot, with reviewer edits laid over
    /// the matching steps.
    pub async fn confirm_pending_run(&self, run_id: Uuid, edits: &[StepEdit]) -> EngineResult<RunSummary> {
        let run = self.pending_run(run_id).await?;

        let mut steps = match &run.rendered_steps {
            Some(value) => snapshot_from_json(value)?,
            None => Vec::new(),
        };
        for edit in edits {
            match steps.iter_mut().find(|s| s.step_id == edit.step_id) {
                Some(step) => step.action.apply_edit(edit),
                None => warn!("Edit for step {} does not match any step of run {}", edit.step_id, run_id),
            }
        }

        if !self
            .store
            .transition_run(run_id, RunStatus::PendingConfirmation, RunStatus::Running)
            .await?
        {
            return Err(self.not_pending(run_id).await);
        }

        // Running from here on; errors must finish the run
        if let Err(e) = self.save_snapshot(run_id, &steps).await {
            return Err(self.abort(run_id, e).await);
        }

        info!("Automation run {} confirmed with {} edited steps", run_id, edits.len());

        let ctx = ExecutionContext::from_run(&run);
        self.drive(&run, steps, &ctx).await
    }

    pub async fn cancel_pending_run(&self, run_id: Uuid) -> EngineResult<()> {
        self.pending_run(run_id).await?;

        if !self
            .store
            .transition_run(run_id, RunStatus::PendingConfirmation, RunStatus::Cancelled)
            .await?
        {
            return Err(self.not_pending(run_id).await);
        }

        info!("Automation run {} cancelled", run_id);
        Ok(())
    }

    /// Continue every run whose wait has elapsed. Runs resume independently;
    /// one failing does not hold up the others.
    pub async fn resume_due_runs(&self, now: DateTime<Utc>) -> EngineResult<Vec<RunSummary>> {
        let due = self.store.due_runs(now).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        info!("Resuming {} automation runs", due.len());

        let results = join_all(due.iter().map(|run| self.resume_run(run))).await;

        let mut resumed = Vec::new();
        for (run, result) in due.iter().zip(results) {
            match result {
                Ok(Some(summary)) => resumed.push(summary),
                Ok(None) => {}
                Err(e) => error!("Failed to resume automation run {}: {}", run.id, e),
            }
        }
        Ok(resumed)
    }

    async fn resume_run(&self, run: &AutomationRun) -> EngineResult<Option<RunSummary>> {
        // Another worker got there first
        if !self.store.claim_resume(run.id).await? {
            return Ok(None);
        }

        let after = run.resume_after_ordinal.unwrap_or(i32::MIN);

        // Claimed runs are no longer due; failures from here on must finish the run
        let remaining = match self.steps_after_wait(run, after).await {
            Ok(remaining) => remaining,
            Err(e) => return Err(self.abort(run.id, e).await),
        };

        info!(
            "Automation run {} resumed after step {} ({} steps left)",
            run.id,
            after,
            remaining.len()
        );

        let ctx = ExecutionContext::from_run(run);
        self.drive(run, remaining, &ctx).await.map(Some)
    }

    /// Complete the wait step run and load the snapshot steps past it.
    async fn steps_after_wait(&self, run: &AutomationRun, after: i32) -> EngineResult<Vec<RenderedStep>> {
        let step_runs = self.store.list_step_runs(run.id).await?;
        if let Some(wait) = step_runs
            .iter()
            .find(|s| s.step_order == after && s.status == StepRunStatus::Running)
        {
            self.store
                .finish_step_run(wait.id, StepRunStatus::Completed, None)
                .await?;
        }

        let steps = match &run.rendered_steps {
            Some(value) => snapshot_from_json(value)?,
            None => Vec::new(),
        };
        Ok(steps.into_iter().filter(|s| s.step_order > after).collect())
    }

    async fn save_snapshot(&self, run_id: Uuid, steps: &[RenderedStep]) -> EngineResult<()> {
        self.store
            .save_rendered_steps(run_id, &snapshot_to_json(steps)?)
            .await?;
        Ok(())
    }

    /// Run steps and mark the run failed if persistence gives out midway.
    async fn drive(
        &self,
        run: &AutomationRun,
        steps: Vec<RenderedStep>,
        ctx: &ExecutionContext,
    ) -> EngineResult<RunSummary> {
        match self.run_steps(run, &steps, ctx).await {
            Ok(summary) => Ok(summary),
            Err(e) => Err(self.abort(run.id, e).await),
        }
    }

    /// Best-effort: mark a running run failed after an engine error.
    async fn abort(&self, run_id: Uuid, e: EngineError) -> EngineError {
        error!("Automation run {} aborted: {}", run_id, e);
        if let Err(mark_err) = self
            .store
            .finish_run(run_id, RunStatus::Failed, Some(&e.to_string()))
            .await
        {
            warn!("Could not mark run {} failed: {}", run_id, mark_err);
        }
        e
    }

    async fn run_steps(
        &self,
        run: &AutomationRun,
        steps: &[RenderedStep],
        ctx: &ExecutionContext,
    ) -> EngineResult<RunSummary> {
        let owner = self.owner_settings(run.owner_id).await?;

        let mut summary = RunSummary {
            run_id: run.id,
            automation_id: run.automation_id,
            status: RunStatus::Running,
            resume_at: None,
            error: None,
        };

        for step in steps {
            let step_run = StepRun {
                id: Uuid::new_v4(),
                run_id: run.id,
                step_id: step.step_id,
                step_type: step.action.type_name().to_string(),
                step_order: step.step_order,
                status: StepRunStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                error_message: None,
            };
            self.store.create_step_run(&step_run).await?;

            match self.executor.dispatch(&step.action, ctx, &owner).await {
                Ok(StepOutcome::Completed) => {
                    info!(
                        run_id = %run.id, step_id = %step.step_id, step = step_run.step_type.as_str(),
                        "Step completed"
                    );
                    self.store
                        .finish_step_run(step_run.id, StepRunStatus::Completed, None)
                        .await?;
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    warn!(
                        run_id = %run.id, step_id = %step.step_id, step = step_run.step_type.as_str(),
                        "Step skipped: {}", reason
                    );
                    self.store
                        .finish_step_run(step_run.id, StepRunStatus::Skipped, Some(&reason))
                        .await?;
                }
                Ok(StepOutcome::Unsupported(step_type)) => {
                    let reason = format!("unknown step type '{}'", step_type);
                    warn!(run_id = %run.id, step_id = %step.step_id, "Step skipped: {}", reason);
                    self.store
                        .finish_step_run(step_run.id, StepRunStatus::Skipped, Some(&reason))
                        .await?;
                }
                Ok(StepOutcome::Suspended { resume_at }) => {
                    // The wait step run stays `running` until the run is resumed.
                    // Confirmed and resumed runs already carry their full snapshot.
                    let snapshot = match &run.rendered_steps {
                        Some(_) => None,
                        None => Some(snapshot_to_json(steps)?),
                    };
                    self.store
                        .suspend_run(run.id, resume_at, step.step_order, snapshot.as_ref())
                        .await?;
                    info!(
                        run_id = %run.id, step_id = %step.step_id, step = "wait",
                        "Step suspended until {}", resume_at
                    );
                    summary.resume_at = Some(resume_at);
                    return Ok(summary);
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(
                        run_id = %run.id, step_id = %step.step_id, step = step_run.step_type.as_str(),
                        "Step failed: {}", message
                    );
                    self.store
                        .finish_step_run(step_run.id, StepRunStatus::Failed, Some(&message))
                        .await?;
                    self.store
                        .finish_run(run.id, RunStatus::Failed, Some(&message))
                        .await?;

                    summary.status = RunStatus::Failed;
                    summary.error = Some(message);
                    return Ok(summary);
                }
            }
        }

        self.store.finish_run(run.id, RunStatus::Completed, None).await?;
        info!("Automation run {} completed", run.id);

        summary.status = RunStatus::Completed;
        Ok(summary)
    }

    async fn owner_settings(&self, owner_id: Uuid) -> EngineResult<OwnerSettings> {
        Ok(self
            .store
            .get_owner_settings(owner_id)
            .await?
            .unwrap_or_else(|| OwnerSettings {
                owner_id,
                ..Default::default()
            }))
    }

    async fn pending_run(&self, run_id: Uuid) -> EngineResult<AutomationRun> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;

        if run.status != RunStatus::PendingConfirmation {
            return Err(EngineError::RunNotPending {
                run_id,
                status: run.status,
            });
        }
        Ok(run)
    }

    /// Error for a lost compare-and-set on a pending run.
    async fn not_pending(&self, run_id: Uuid) -> EngineError {
        match self.store.get_run(run_id).await {
            Ok(Some(run)) => EngineError::RunNotPending {
                run_id,
                status: run.status,
            },
            Ok(None) => EngineError::RunNotFound(run_id),
            Err(e) => e.into(),
        }
    }
}

fn new_run(
    automation: &AutomationDefinition,
    ctx: &ExecutionContext,
    status: RunStatus,
    rendered_steps: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> AutomationRun {
    AutomationRun {
        id: Uuid::new_v4(),
        automation_id: automation.id,
        owner_id: ctx.owner_id,
        lead_id: ctx.lead_id,
        multi_service_lead_id: ctx.multi_service_lead_id,
        estimate_id: ctx.estimate_id,
        work_order_id: ctx.work_order_id,
        invoice_id: ctx.invoice_id,
        status,
        rendered_steps,
        resume_at: None,
        resume_after_ordinal: None,
        error_message: None,
        created_at: now,
        started_at: (status == RunStatus::Running).then_some(now),
        completed_at: None,
    }
}
