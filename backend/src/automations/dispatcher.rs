// Trigger Dispatcher - matches business events to active automations

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tradeflow_shared::AutomationDefinition;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::engine::{AutomationEngine, RunSummary};
use super::error::EngineResult;

#[derive(Debug, Clone, Serialize)]
pub struct AutomationFailure {
    pub automation_id: Uuid,
    pub error: String,
}

/// What one trigger started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerOutcome {
    /// Runs held for review; surfaced to the user who fired the trigger.
    pub pending_run_ids: Vec<Uuid>,
    pub runs: Vec<RunSummary>,
    pub failures: Vec<AutomationFailure>,
}

enum Dispatched {
    Pending(Uuid),
    Run(RunSummary),
}

pub struct TriggerDispatcher {
    engine: Arc<AutomationEngine>,
}

impl TriggerDispatcher {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        Self { engine }
    }

    /// Fire `trigger_type` for the context's owner.
    ///
    /// Matching automations are started concurrently and no ordering between
    /// them is guaranteed. A failure in one is logged and reported in the
    /// outcome without affecting the others.
    pub async fn trigger_automations(
        &self,
        trigger_type: &str,
        ctx: &ExecutionContext,
        is_manual_trigger: bool,
    ) -> EngineResult<TriggerOutcome> {
        let automations = self
            .engine
            .store()
            .active_automations(ctx.owner_id, trigger_type)
            .await?;

        if automations.is_empty() {
            info!("No active automations for trigger '{}' (owner {})", trigger_type, ctx.owner_id);
            return Ok(TriggerOutcome::default());
        }

        info!(
            "Trigger '{}' matched {} automations (owner {}, manual: {})",
            trigger_type,
            automations.len(),
            ctx.owner_id,
            is_manual_trigger
        );

        let results = join_all(
            automations
                .iter()
                .map(|automation| self.dispatch_one(automation, ctx, is_manual_trigger)),
        )
        .await;

        let mut outcome = TriggerOutcome::default();
        for (automation, result) in automations.iter().zip(results) {
            match result {
                Ok(Dispatched::Pending(run_id)) => outcome.pending_run_ids.push(run_id),
                Ok(Dispatched::Run(summary)) => outcome.runs.push(summary),
                Err(e) => {
                    error!("Automation '{}' ({}) failed: {}", automation.name, automation.id, e);
                    outcome.failures.push(AutomationFailure {
                        automation_id: automation.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    async fn dispatch_one(
        &self,
        automation: &AutomationDefinition,
        ctx: &ExecutionContext,
        is_manual_trigger: bool,
    ) -> EngineResult<Dispatched> {
        // Automatic triggers never wait for a human, even on gated automations
        if automation.requires_confirmation && is_manual_trigger {
            let run_id = self.engine.create_pending_run_for(automation, ctx).await?;
            return Ok(Dispatched::Pending(run_id));
        }

        let summary = self.engine.execute_automation(automation, ctx).await?;
        Ok(Dispatched::Run(summary))
    }
}
