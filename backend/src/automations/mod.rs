// Automation Engine
//
// Runs owner-defined step sequences (email, SMS, waits, stage changes, tasks,
// tags) when business events fire. Runs are persisted with per-step history
// and can be held for human review before anything is sent.

pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod steps;
pub mod tokens;

pub use context::{
    BusinessData, EstimateData, ExecutionContext, InvoiceData, LeadData, LineItem, RecordRef,
    WorkOrderData,
};
pub use dispatcher::{TriggerDispatcher, TriggerOutcome};
pub use engine::{AutomationEngine, RunSummary};
pub use error::{EngineError, EngineResult, StepError};
pub use executor::{ExecutorDeps, StepExecutor, StepOutcome};
pub use steps::{RenderedStep, StepAction, StepEdit, StepKind};
pub use tokens::TokenResolver;
