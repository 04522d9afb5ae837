//! Automation Handlers
//!
//! Definitions CRUD, trigger entry point, and the run review endpoints
//! (confirm / cancel a pending run).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tradeflow_shared::{AutomationDefinition, AutomationRun, RunStatus, StepRun};
use uuid::Uuid;
use validator::Validate;

use crate::automations::{ExecutionContext, RunSummary, StepAction, StepEdit, TriggerOutcome};
use crate::store::{NewAutomation, NewStep};
use crate::error::validation_error;
use crate::{ApiResult, AppError, AppState};

// ==================== Structs ====================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStepRequest {
    #[validate(length(min = 1, max = 50, message = "step_type is required"))]
    pub step_type: String,
    pub step_order: i32,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAutomationRequest {
    pub owner_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub trigger_type: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[validate(nested)]
    pub steps: Vec<CreateStepRequest>,
}

fn default_true() -> bool {
    true
}

impl CreateAutomationRequest {
    /// Step orders must be unique; execution follows them.
    fn check_step_orders(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        match self.steps.iter().find(|s| !seen.insert(s.step_order)) {
            Some(step) => Err(validation_error(
                "steps",
                &format!("duplicate step_order {}", step.step_order),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    pub owner_id: Uuid,
    pub status: Option<RunStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TriggerRequest {
    #[validate(length(min = 1, max = 100))]
    pub trigger_type: String,
    pub context: ExecutionContext,
    #[serde(default)]
    pub is_manual_trigger: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRunRequest {
    #[serde(default)]
    pub edited_steps: Vec<StepEdit>,
}

#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: AutomationRun,
    pub step_runs: Vec<StepRun>,
}

// ==================== Routes ====================

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_automations).post(create_automation))
        .route("/trigger", post(trigger))
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/confirm", post(confirm_run))
        .route("/runs/:id/cancel", post(cancel_run))
        .route("/:id", get(get_automation).delete(delete_automation))
        .route("/:id/active", put(set_active))
}

// ==================== Handlers ====================

async fn list_automations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<Vec<AutomationDefinition>>> {
    let automations = state.store.list_automations(query.owner_id).await?;
    Ok(Json(automations))
}

async fn create_automation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAutomationRequest>,
) -> ApiResult<(StatusCode, Json<AutomationDefinition>)> {
    payload.validate()?;
    payload.check_step_orders()?;

    // Reject config that could never run rather than failing the first run
    for step in &payload.steps {
        if let Err(e) = StepAction::parse(&step.step_type, &step.config) {
            return Err(validation_error(
                &format!("steps[{}].config", step.step_order),
                &e.to_string(),
            ));
        }
    }

    let automation = NewAutomation {
        owner_id: payload.owner_id,
        name: payload.name.trim().to_string(),
        trigger_type: payload.trigger_type.trim().to_string(),
        is_active: payload.is_active,
        requires_confirmation: payload.requires_confirmation,
        steps: payload
            .steps
            .into_iter()
            .map(|s| NewStep {
                step_type: s.step_type,
                step_order: s.step_order,
                config: s.config,
            })
            .collect(),
    };

    let created = state.store.create_automation(&automation).await?;
    tracing::info!("Created automation '{}' ({}) for owner {}", created.name, created.id, created.owner_id);

    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationDefinition>> {
    state
        .store
        .get_automation(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Automation {}", id)))
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> ApiResult<StatusCode> {
    state.store.set_automation_active(id, payload.is_active).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.delete_automation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TriggerRequest>,
) -> ApiResult<Json<TriggerOutcome>> {
    payload.validate()?;

    let outcome = state
        .dispatcher
        .trigger_automations(&payload.trigger_type, &payload.context, payload.is_manual_trigger)
        .await?;

    Ok(Json(outcome))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunListQuery>,
) -> ApiResult<Json<Vec<AutomationRun>>> {
    let runs = state.store.list_runs(query.owner_id, query.status).await?;
    Ok(Json(runs))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    let run = state
        .store
        .get_run(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {}", id)))?;
    let step_runs = state.store.list_step_runs(id).await?;

    Ok(Json(RunDetail { run, step_runs }))
}

async fn confirm_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ConfirmRunRequest>>,
) -> ApiResult<Json<RunSummary>> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let summary = state.engine.confirm_pending_run(id, &request.edited_steps).await?;
    Ok(Json(summary))
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.cancel_pending_run(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
