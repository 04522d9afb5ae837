use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod automations;

pub use automations::automation_routes;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db_pool {
        Some(pool) => {
            if crate::database::health_check(pool).await {
                "up"
            } else {
                "down"
            }
        }
        None => "not_configured",
    };

    let resume_job = match &state.job_logs {
        Some(logs) => logs.read().await.last().map(|log| {
            json!({
                "status": log.status,
                "started_at": log.started_at,
                "items_processed": log.items_processed,
            })
        }),
        None => None,
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "degraded" },
            "service": "tradeflow-api",
            "database": database,
            "last_resume_job": resume_job,
        })),
    )
}
