// Resume Runs Job - continues automation runs whose wait step has elapsed

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use tradeflow_shared::RunStatus;

use super::JobError;
use crate::automations::AutomationEngine;

#[derive(Debug, Default)]
pub struct ResumeRunsResult {
    pub runs_resumed: i32,
    pub runs_completed: i32,
    pub runs_failed: i32,
    pub runs_waiting: i32,
    pub errors: Vec<String>,
}

pub struct ResumeRunsJob {
    engine: Arc<AutomationEngine>,
}

impl ResumeRunsJob {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> Result<ResumeRunsResult, JobError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ResumeRunsResult, JobError> {
        let summaries = self
            .engine
            .resume_due_runs(now)
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))?;

        let mut result = ResumeRunsResult::default();
        for summary in summaries {
            result.runs_resumed += 1;
            match summary.status {
                RunStatus::Completed => result.runs_completed += 1,
                RunStatus::Failed => {
                    result.runs_failed += 1;
                    if let Some(error) = summary.error {
                        result.errors.push(format!("run {}: {}", summary.run_id, error));
                    }
                }
                // Parked on a later wait step
                _ => result.runs_waiting += 1,
            }
        }

        if result.runs_resumed > 0 {
            info!(
                "Resumed {} automation runs: {} completed, {} failed, {} waiting again",
                result.runs_resumed, result.runs_completed, result.runs_failed, result.runs_waiting
            );
        }

        Ok(result)
    }
}
