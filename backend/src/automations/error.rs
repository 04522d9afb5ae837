use thiserror::Error;
use tradeflow_shared::RunStatus;
use uuid::Uuid;

use crate::store::StoreError;

/// A step failure. Every variant aborts the rest of the run.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Missing recipient: {0}")]
    MissingRecipient(String),
    #[error("Delivery error: {0}")]
    Delivery(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Automation {0} not found")]
    AutomationNotFound(Uuid),
    #[error("Run {0} not found")]
    RunNotFound(Uuid),
    #[error("Run {run_id} is {status}, not pending confirmation")]
    RunNotPending { run_id: Uuid, status: RunStatus },
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
