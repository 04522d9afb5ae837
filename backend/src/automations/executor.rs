// Step Executor - dispatches one step to its side-effecting handler

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use tradeflow_shared::OwnerSettings;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::error::StepError;
use super::steps::{EmailStep, SmsStep, StageStep, StepAction, TagStep, TaskStep, WaitStep};
use super::tokens::TokenResolver;
use crate::services::{
    EmailDelivery, OutgoingEmail, SecretDecryptor, SmsClientFactory, SmsCredentials,
};
use crate::store::{AutomationStore, StoreError, TaskEntry};

/// What a step did, short of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    /// A soft no-op: nothing to do, and that is not an error.
    Skipped(String),
    /// A wait step; the run continues at `resume_at`.
    Suspended { resume_at: DateTime<Utc> },
    /// Unrecognised step kind, logged and passed over.
    Unsupported(String),
}

/// Collaborators the executor needs to perform side effects.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub store: Arc<dyn AutomationStore>,
    pub email: Arc<dyn EmailDelivery>,
    pub sms: Arc<dyn SmsClientFactory>,
    pub secrets: Arc<dyn SecretDecryptor>,
}

pub struct StepExecutor {
    deps: ExecutorDeps,
    resolver: TokenResolver,
    fallback_from_name: String,
}

impl StepExecutor {
    pub fn new(deps: ExecutorDeps, resolver: TokenResolver, fallback_from_name: impl Into<String>) -> Self {
        Self {
            deps,
            resolver,
            fallback_from_name: fallback_from_name.into(),
        }
    }

    pub fn resolver(&self) -> &TokenResolver {
        &self.resolver
    }

    /// Perform an already-rendered step. Immediate runs and confirmed runs
    /// both end up here.
    pub async fn dispatch(
        &self,
        action: &StepAction,
        ctx: &ExecutionContext,
        owner: &OwnerSettings,
    ) -> Result<StepOutcome, StepError> {
        match action {
            StepAction::SendEmail(step) => self.send_email(step, owner).await,
            StepAction::SendSms(step) => self.send_sms(step, ctx).await,
            StepAction::Wait(step) => Ok(Self::wait(step, Utc::now())),
            StepAction::UpdateStage(step) => self.update_stage(step, ctx).await,
            StepAction::CreateTask(step) => self.create_task(step, ctx).await,
            StepAction::AddTag(step) => self.add_tag(step, ctx).await,
            StepAction::Unknown { step_type } => {
                warn!("Unknown automation step type '{}', skipping", step_type);
                Ok(StepOutcome::Unsupported(step_type.clone()))
            }
            StepAction::Invalid { reason, .. } => Err(StepError::Configuration(reason.clone())),
        }
    }

    async fn send_email(&self, step: &EmailStep, owner: &OwnerSettings) -> Result<StepOutcome, StepError> {
        if step.subject.trim().is_empty() {
            return Err(StepError::Configuration("send_email requires a subject".to_string()));
        }
        if step.body.trim().is_empty() {
            return Err(StepError::Configuration("send_email requires a body".to_string()));
        }

        let to = non_empty(step.to.as_deref()).ok_or_else(|| {
            StepError::MissingRecipient("no email address on the lead, estimate, work order or invoice".to_string())
        })?;

        let from_name = non_empty(step.from_name.as_deref())
            .or(non_empty(owner.email_from_name.as_deref()))
            .unwrap_or(&self.fallback_from_name)
            .to_string();
        let reply_to = non_empty(step.reply_to.as_deref())
            .or(non_empty(owner.email_reply_to.as_deref()))
            .map(str::to_string);

        let email = OutgoingEmail {
            from_name,
            to: to.to_string(),
            reply_to,
            subject: step.subject.clone(),
            html: wrap_html(&step.body),
        };

        match self.deps.email.send_email(&email).await {
            Ok(true) => Ok(StepOutcome::Completed),
            Ok(false) => Err(StepError::Delivery(format!("email to {} was not accepted by any provider", to))),
            Err(e) => Err(StepError::Delivery(e.to_string())),
        }
    }

    async fn send_sms(&self, step: &SmsStep, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        if step.body.trim().is_empty() {
            return Err(StepError::Configuration("send_sms requires a body".to_string()));
        }

        let Some(to) = non_empty(step.to.as_deref()) else {
            warn!("No phone number for SMS step, skipping (owner {})", ctx.owner_id);
            return Ok(StepOutcome::Skipped("no recipient phone number".to_string()));
        };

        // Credentials are read and decrypted per step, never cached
        let Some(credentials) = self.sms_credentials(ctx.owner_id).await? else {
            warn!("SMS credentials not configured for owner {}, skipping", ctx.owner_id);
            return Ok(StepOutcome::Skipped("sms credentials not configured".to_string()));
        };

        let from = credentials.from_number.clone();
        let client = self
            .deps
            .sms
            .build(credentials)
            .map_err(|e| StepError::Delivery(e.to_string()))?;

        client
            .send_message(&step.body, &from, to)
            .await
            .map_err(|e| StepError::Delivery(e.to_string()))?;

        Ok(StepOutcome::Completed)
    }

    async fn sms_credentials(&self, owner_id: Uuid) -> Result<Option<SmsCredentials>, StepError> {
        let Some(settings) = self.deps.store.get_owner_settings(owner_id).await? else {
            return Ok(None);
        };

        let (Some(account_enc), Some(token_enc), Some(from_number)) = (
            non_empty(settings.sms_account_id_encrypted.as_deref()),
            non_empty(settings.sms_auth_token_encrypted.as_deref()),
            non_empty(settings.sms_from_number.as_deref()),
        ) else {
            return Ok(None);
        };

        let decrypt = |value: &str| {
            self.deps
                .secrets
                .decrypt(value)
                .map_err(|e| StepError::Delivery(format!("could not decrypt sms credentials: {}", e)))
        };
        let account_id = decrypt(account_enc)?;
        let auth_token = decrypt(token_enc)?;

        if account_id.trim().is_empty() || auth_token.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(SmsCredentials {
            account_id,
            auth_token,
            from_number: from_number.to_string(),
        }))
    }

    fn wait(step: &WaitStep, now: DateTime<Utc>) -> StepOutcome {
        let millis = step.duration_ms();
        if millis <= 0 {
            return StepOutcome::Completed;
        }
        StepOutcome::Suspended {
            resume_at: now + Duration::milliseconds(millis),
        }
    }

    async fn update_stage(&self, step: &StageStep, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        let stage = step.new_stage.trim();
        if stage.is_empty() {
            return Err(StepError::Configuration("update_stage requires new_stage".to_string()));
        }

        let Some(target) = ctx.record_target() else {
            return Ok(StepOutcome::Skipped("no lead on context".to_string()));
        };

        match self.deps.store.update_record_stage(target, stage).await {
            Ok(()) => {
                info!("Moved {:?} to stage '{}'", target, stage);
                Ok(StepOutcome::Completed)
            }
            Err(StoreError::NotFound(record)) => Ok(StepOutcome::Skipped(format!("{} no longer exists", record))),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_task(&self, step: &TaskStep, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        let task = TaskEntry {
            id: Uuid::new_v4(),
            owner_id: ctx.owner_id,
            target: ctx.record_target(),
            title: step.title.clone(),
            description: step.description.clone(),
            created_at: Utc::now(),
        };

        info!("Automation task for owner {}: {}", ctx.owner_id, task.title);

        // Task logging never fails the run
        if let Err(e) = self.deps.store.record_task(&task).await {
            warn!("Could not record automation task {}: {}", task.id, e);
        }

        Ok(StepOutcome::Completed)
    }

    async fn add_tag(&self, step: &TagStep, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        let tag_id = step
            .tag_id
            .ok_or_else(|| StepError::Configuration("add_tag requires tag_id".to_string()))?;

        let Some(target) = ctx.record_target() else {
            return Ok(StepOutcome::Skipped("no lead on context".to_string()));
        };

        match self.deps.store.add_record_tag(target, tag_id).await {
            Ok(()) => Ok(StepOutcome::Completed),
            Err(StoreError::NotFound(record)) => Ok(StepOutcome::Skipped(format!("{} no longer exists", record))),
            Err(e) => Err(e.into()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn wrap_html(body: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; white-space: pre-wrap;">{}</div>"#,
        body
    )
}
