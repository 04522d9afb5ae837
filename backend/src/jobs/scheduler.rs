// Job Scheduler - Central scheduler for background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::ResumeRunsJob;
use crate::automations::AutomationEngine;
use crate::config::AutomationConfig;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub resume_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            resume_interval_secs: 30,
        }
    }
}

impl From<&AutomationConfig> for JobConfig {
    fn from(config: &AutomationConfig) -> Self {
        Self {
            resume_interval_secs: config.resume_interval_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<AutomationEngine>,
    config: JobConfig,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobScheduler {
    pub async fn new(engine: Arc<AutomationEngine>, config: JobConfig) -> JobResult<Self> {
        if config.resume_interval_secs == 0 {
            return Err(JobError::ConfigError(
                "resume interval must be at least one second".to_string(),
            ));
        }

        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_run_resumer().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    pub fn execution_logs(&self) -> Arc<RwLock<Vec<JobExecutionLog>>> {
        self.execution_logs.clone()
    }

    async fn schedule_run_resumer(&self) -> JobResult<()> {
        let interval = self.config.resume_interval_secs;

        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                let job = ResumeRunsJob::new(engine);

                let log = match job.run_at(started_at).await {
                    Ok(result) => {
                        let completed_at = Utc::now();
                        JobExecutionLog {
                            id: Uuid::new_v4(),
                            job_name: "Resume Automation Runs".to_string(),
                            started_at,
                            completed_at: Some(completed_at),
                            status: if result.errors.is_empty() {
                                JobStatus::Completed
                            } else {
                                JobStatus::PartialFailure
                            },
                            items_processed: result.runs_resumed,
                            errors: result.errors,
                            duration_ms: Some((completed_at - started_at).num_milliseconds()),
                        }
                    }
                    Err(e) => {
                        error!("Resume runs job failed: {}", e);
                        JobExecutionLog {
                            id: Uuid::new_v4(),
                            job_name: "Resume Automation Runs".to_string(),
                            started_at,
                            completed_at: Some(Utc::now()),
                            status: JobStatus::Failed,
                            items_processed: 0,
                            errors: vec![e.to_string()],
                            duration_ms: None,
                        }
                    }
                };

                record_execution(&logs, log).await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled automation run resumer to run every {} seconds", interval);

        Ok(())
    }
}

async fn record_execution(logs: &RwLock<Vec<JobExecutionLog>>, log: JobExecutionLog) {
    // Idle ticks are not worth keeping
    if log.items_processed == 0 && log.status == JobStatus::Completed {
        return;
    }

    let mut logs = logs.write().await;
    logs.push(log);
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}
