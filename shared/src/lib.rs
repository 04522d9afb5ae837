use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A user-defined automation: an ordered list of steps fired by a named trigger.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub trigger_type: String,
    pub is_active: bool,
    pub requires_confirmation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Ordered by `step_order`, loaded separately from the automation row.
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub step_type: String,
    pub step_order: i32,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "automation_run_status", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    PendingConfirmation,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingConfirmation => "pending_confirmation",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_confirmation" => Some(Self::PendingConfirmation),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance of an automation.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub owner_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub multi_service_lead_id: Option<Uuid>,
    pub estimate_id: Option<Uuid>,
    pub work_order_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub status: RunStatus,
    /// Pre-rendered step content; set for confirmation-gated runs and for
    /// runs suspended on a wait step.
    pub rendered_steps: Option<serde_json::Value>,
    pub resume_at: Option<DateTime<Utc>>,
    pub resume_after_ordinal: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "automation_step_status", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row for a step that began executing.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub step_type: String,
    pub step_order: i32,
    pub status: StepRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Per-owner sender identity and messaging credentials.
///
/// The SMS account id and auth token are stored encrypted and only decrypted
/// at the moment an SMS step runs.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub owner_id: Uuid,
    pub business_name: Option<String>,
    pub business_phone: Option<String>,
    pub business_email: Option<String>,
    pub email_from_name: Option<String>,
    pub email_reply_to: Option<String>,
    #[serde(skip_serializing)]
    pub sms_account_id_encrypted: Option<String>,
    #[serde(skip_serializing)]
    pub sms_auth_token_encrypted: Option<String>,
    pub sms_from_number: Option<String>,
}

impl fmt::Debug for OwnerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerSettings")
            .field("owner_id", &self.owner_id)
            .field("business_name", &self.business_name)
            .field("email_from_name", &self.email_from_name)
            .field("email_reply_to", &self.email_reply_to)
            .field("sms_configured", &self.sms_account_id_encrypted.is_some())
            .finish()
    }
}
