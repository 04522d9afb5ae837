// Automation Steps - typed step actions parsed from stored step config

use serde::{Deserialize, Serialize};
use std::fmt;
use tradeflow_shared::StepDefinition;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::error::StepError;
use super::tokens::TokenResolver;

/// The six step kinds an automation can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SendEmail,
    SendSms,
    Wait,
    UpdateStage,
    CreateTask,
    AddTag,
}

impl StepKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "send_email" => Some(Self::SendEmail),
            "send_sms" => Some(Self::SendSms),
            "wait" => Some(Self::Wait),
            "update_stage" => Some(Self::UpdateStage),
            "create_task" => Some(Self::CreateTask),
            "add_tag" => Some(Self::AddTag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendSms => "send_sms",
            Self::Wait => "wait",
            Self::UpdateStage => "update_stage",
            Self::CreateTask => "create_task",
            Self::AddTag => "add_tag",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailStep {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Filled in when the step is rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmsStep {
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUnit {
    #[default]
    Minutes,
    Hours,
    Days,
}

impl WaitUnit {
    fn millis(&self) -> i64 {
        match self {
            Self::Minutes => 60 * 1000,
            Self::Hours => 60 * 60 * 1000,
            Self::Days => 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitStep {
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub unit: WaitUnit,
}

impl WaitStep {
    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration) * self.unit.millis()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStep {
    #[serde(default)]
    pub new_stage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagStep {
    #[serde(default)]
    pub tag_id: Option<Uuid>,
}

/// A step with its kind-specific fields. The same type carries both the raw
/// templates from the definition and the rendered content of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    SendEmail(EmailStep),
    SendSms(SmsStep),
    Wait(WaitStep),
    UpdateStage(StageStep),
    CreateTask(TaskStep),
    AddTag(TagStep),
    Unknown { step_type: String },
    /// A known kind whose config did not parse. Fails when reached.
    Invalid { step_type: String, reason: String },
}

impl StepAction {
    /// Parse a stored step. Unknown kinds parse successfully so the run can
    /// skip them; malformed config for a known kind is a configuration error.
    pub fn parse(step_type: &str, config: &serde_json::Value) -> Result<Self, StepError> {
        let Some(kind) = StepKind::parse(step_type) else {
            return Ok(Self::Unknown {
                step_type: step_type.to_string(),
            });
        };

        let config = if config.is_null() {
            serde_json::json!({})
        } else {
            config.clone()
        };

        let invalid = |e: serde_json::Error| {
            StepError::Configuration(format!("invalid {} config: {}", kind, e))
        };

        Ok(match kind {
            StepKind::SendEmail => Self::SendEmail(serde_json::from_value(config).map_err(invalid)?),
            StepKind::SendSms => Self::SendSms(serde_json::from_value(config).map_err(invalid)?),
            StepKind::Wait => Self::Wait(serde_json::from_value(config).map_err(invalid)?),
            StepKind::UpdateStage => Self::UpdateStage(serde_json::from_value(config).map_err(invalid)?),
            StepKind::CreateTask => Self::CreateTask(serde_json::from_value(config).map_err(invalid)?),
            StepKind::AddTag => Self::AddTag(serde_json::from_value(config).map_err(invalid)?),
        })
    }

    pub fn kind(&self) -> Option<StepKind> {
        match self {
            Self::SendEmail(_) => Some(StepKind::SendEmail),
            Self::SendSms(_) => Some(StepKind::SendSms),
            Self::Wait(_) => Some(StepKind::Wait),
            Self::UpdateStage(_) => Some(StepKind::UpdateStage),
            Self::CreateTask(_) => Some(StepKind::CreateTask),
            Self::AddTag(_) => Some(StepKind::AddTag),
            Self::Unknown { .. } | Self::Invalid { .. } => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Unknown { step_type } | Self::Invalid { step_type, .. } => step_type,
            other => other.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// Resolve every template field and pin the recipients. Pure: no I/O.
    pub fn render(&self, resolver: &TokenResolver, ctx: &ExecutionContext) -> Self {
        match self {
            Self::SendEmail(step) => Self::SendEmail(EmailStep {
                subject: resolver.resolve(&step.subject, ctx),
                body: resolver.resolve(&step.body, ctx),
                from_name: resolver.resolve_opt(step.from_name.as_deref(), ctx),
                reply_to: resolver.resolve_opt(step.reply_to.as_deref(), ctx),
                to: ctx.recipient_email().map(str::to_string),
            }),
            Self::SendSms(step) => Self::SendSms(SmsStep {
                body: resolver.resolve(&step.body, ctx),
                to: ctx.recipient_phone().map(str::to_string),
            }),
            Self::CreateTask(step) => Self::CreateTask(TaskStep {
                title: resolver.resolve(&step.title, ctx),
                description: resolver.resolve_opt(step.description.as_deref(), ctx),
            }),
            other => other.clone(),
        }
    }

    /// Overlay a reviewer's edits. Fields that do not apply to the step kind
    /// are ignored.
    pub fn apply_edit(&mut self, edit: &StepEdit) {
        match self {
            Self::SendEmail(step) => {
                if let Some(subject) = &edit.subject {
                    step.subject = subject.clone();
                }
                if let Some(body) = &edit.body {
                    step.body = body.clone();
                }
            }
            Self::SendSms(step) => {
                if let Some(body) = &edit.body {
                    step.body = body.clone();
                }
            }
            Self::CreateTask(step) => {
                if let Some(title) = &edit.title {
                    step.title = title.clone();
                }
                if let Some(description) = &edit.description {
                    step.description = Some(description.clone());
                }
            }
            _ => {}
        }
    }
}

/// One step of a pre-rendered run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedStep {
    pub step_id: Uuid,
    pub step_order: i32,
    pub action: StepAction,
}

impl RenderedStep {
    /// Render a stored step. A config error is kept in the snapshot as
    /// [`StepAction::Invalid`] so it fails the run only when that step is reached.
    pub fn from_definition(step: &StepDefinition, resolver: &TokenResolver, ctx: &ExecutionContext) -> Self {
        let action = match StepAction::parse(&step.step_type, &step.config) {
            Ok(action) => action.render(resolver, ctx),
            Err(e) => StepAction::Invalid {
                step_type: step.step_type.clone(),
                reason: e.to_string(),
            },
        };

        Self {
            step_id: step.id,
            step_order: step.step_order,
            action,
        }
    }
}

/// Render every step of a definition in ordinal order. Pure: no I/O.
pub fn render_all(steps: &[StepDefinition], resolver: &TokenResolver, ctx: &ExecutionContext) -> Vec<RenderedStep> {
    let mut rendered: Vec<RenderedStep> = steps
        .iter()
        .map(|step| RenderedStep::from_definition(step, resolver, ctx))
        .collect();
    rendered.sort_by_key(|s| s.step_order);
    rendered
}

/// Reviewer-supplied replacement content for one step of a pending run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepEdit {
    pub step_id: Uuid,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

pub fn snapshot_to_json(steps: &[RenderedStep]) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(steps)
}

pub fn snapshot_from_json(value: &serde_json::Value) -> Result<Vec<RenderedStep>, serde_json::Error> {
    let mut steps: Vec<RenderedStep> = serde_json::from_value(value.clone())?;
    steps.sort_by_key(|s| s.step_order);
    Ok(steps)
}
