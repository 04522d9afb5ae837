use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tradeflow_shared::{
    AutomationDefinition, AutomationRun, OwnerSettings, RunStatus, StepDefinition, StepRun,
    StepRunStatus,
};
use uuid::Uuid;

use super::{AutomationStore, NewAutomation, StoreError, StoreResult, TaskEntry};
use crate::automations::RecordRef;

const AUTOMATION_COLUMNS: &str = r#"
    id, owner_id, name, trigger_type, is_active, requires_confirmation, created_at, updated_at
"#;

const RUN_COLUMNS: &str = r#"
    id, automation_id, owner_id, lead_id, multi_service_lead_id, estimate_id, work_order_id,
    invoice_id, status, rendered_steps, resume_at, resume_after_ordinal, error_message,
    created_at, started_at, completed_at
"#;

const STEP_RUN_COLUMNS: &str = r#"
    id, run_id, step_id, step_type, step_order, status, started_at, completed_at, error_message
"#;

#[derive(Clone)]
pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach ordered steps to a batch of automations in one query.
    async fn with_steps(&self, mut automations: Vec<AutomationDefinition>) -> StoreResult<Vec<AutomationDefinition>> {
        if automations.is_empty() {
            return Ok(automations);
        }

        let ids: Vec<Uuid> = automations.iter().map(|a| a.id).collect();
        let steps = sqlx::query_as::<_, StepDefinition>(
            r#"
            SELECT id, automation_id, step_type, step_order, config, created_at
            FROM automation_steps
            WHERE automation_id = ANY($1)
            ORDER BY automation_id, step_order ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_automation: HashMap<Uuid, Vec<StepDefinition>> = HashMap::new();
        for step in steps {
            by_automation.entry(step.automation_id).or_default().push(step);
        }

        for automation in &mut automations {
            automation.steps = by_automation.remove(&automation.id).unwrap_or_default();
        }

        Ok(automations)
    }
}

#[async_trait]
impl AutomationStore for PgAutomationStore {
    async fn create_automation(&self, automation: &NewAutomation) -> StoreResult<AutomationDefinition> {
        automation.check_ordinals()?;

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO automations (id, owner_id, name, trigger_type, is_active, requires_confirmation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(id)
        .bind(automation.owner_id)
        .bind(&automation.name)
        .bind(&automation.trigger_type)
        .bind(automation.is_active)
        .bind(automation.requires_confirmation)
        .execute(&mut *tx)
        .await?;

        for step in &automation.steps {
            sqlx::query(
                r#"
                INSERT INTO automation_steps (id, automation_id, step_type, step_order, config, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&step.step_type)
            .bind(step.step_order)
            .bind(&step.config)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_automation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Automation {}", id)))
    }

    async fn list_automations(&self, owner_id: Uuid) -> StoreResult<Vec<AutomationDefinition>> {
        let automations = sqlx::query_as::<_, AutomationDefinition>(&format!(
            "SELECT {} FROM automations WHERE owner_id = $1 ORDER BY created_at ASC",
            AUTOMATION_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        self.with_steps(automations).await
    }

    async fn get_automation(&self, automation_id: Uuid) -> StoreResult<Option<AutomationDefinition>> {
        let automation = sqlx::query_as::<_, AutomationDefinition>(&format!(
            "SELECT {} FROM automations WHERE id = $1",
            AUTOMATION_COLUMNS
        ))
        .bind(automation_id)
        .fetch_optional(&self.pool)
        .await?;

        match automation {
            Some(a) => Ok(self.with_steps(vec![a]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn set_automation_active(&self, automation_id: Uuid, is_active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE automations SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(automation_id)
            .bind(is_active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Automation {}", automation_id)));
        }
        Ok(())
    }

    async fn delete_automation(&self, automation_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM automations WHERE id = $1")
            .bind(automation_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Automation {}", automation_id)));
        }
        Ok(())
    }

    async fn active_automations(
        &self,
        owner_id: Uuid,
        trigger_type: &str,
    ) -> StoreResult<Vec<AutomationDefinition>> {
        let automations = sqlx::query_as::<_, AutomationDefinition>(&format!(
            r#"
            SELECT {} FROM automations
            WHERE owner_id = $1 AND trigger_type = $2 AND is_active = true
            ORDER BY created_at ASC
            "#,
            AUTOMATION_COLUMNS
        ))
        .bind(owner_id)
        .bind(trigger_type)
        .fetch_all(&self.pool)
        .await?;

        self.with_steps(automations).await
    }

    async fn get_owner_settings(&self, owner_id: Uuid) -> StoreResult<Option<OwnerSettings>> {
        let settings = sqlx::query_as::<_, OwnerSettings>(
            r#"
            SELECT owner_id, business_name, business_phone, business_email, email_from_name,
                   email_reply_to, sms_account_id_encrypted, sms_auth_token_encrypted, sms_from_number
            FROM owner_settings
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings)
    }

    async fn create_run(&self, run: &AutomationRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_runs
            (id, automation_id, owner_id, lead_id, multi_service_lead_id, estimate_id, work_order_id,
             invoice_id, status, rendered_steps, resume_at, resume_after_ordinal, error_message,
             created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(run.id)
        .bind(run.automation_id)
        .bind(run.owner_id)
        .bind(run.lead_id)
        .bind(run.multi_service_lead_id)
        .bind(run.estimate_id)
        .bind(run.work_order_id)
        .bind(run.invoice_id)
        .bind(run.status)
        .bind(&run.rendered_steps)
        .bind(run.resume_at)
        .bind(run.resume_after_ordinal)
        .bind(&run.error_message)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<AutomationRun>> {
        let run = sqlx::query_as::<_, AutomationRun>(&format!(
            "SELECT {} FROM automation_runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    async fn list_runs(&self, owner_id: Uuid, status: Option<RunStatus>) -> StoreResult<Vec<AutomationRun>> {
        let runs = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            SELECT {} FROM automation_runs
            WHERE owner_id = $1 AND ($2::automation_run_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT 200
            "#,
            RUN_COLUMNS
        ))
        .bind(owner_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    async fn transition_run(&self, run_id: Uuid, from: RunStatus, to: RunStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_runs
            SET status = $3,
                started_at = CASE WHEN $3 = 'running'::automation_run_status THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'failed', 'cancelled') THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(run_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_run(&self, run_id: Uuid, status: RunStatus, error: Option<&str>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE automation_runs
            SET status = $2, error_message = $3, resume_at = NULL, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Invalid(format!(
                "run {} is not running, cannot finish as {}",
                run_id, status
            )));
        }
        Ok(())
    }

    async fn save_rendered_steps(&self, run_id: Uuid, steps: &serde_json::Value) -> StoreResult<()> {
        sqlx::query("UPDATE automation_runs SET rendered_steps = $2 WHERE id = $1")
            .bind(run_id)
            .bind(steps)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn suspend_run(
        &self,
        run_id: Uuid,
        resume_at: DateTime<Utc>,
        after_ordinal: i32,
        snapshot: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE automation_runs
            SET resume_at = $2, resume_after_ordinal = $3,
                rendered_steps = COALESCE($4, rendered_steps)
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(resume_at)
        .bind(after_ordinal)
        .bind(snapshot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<AutomationRun>> {
        let runs = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            SELECT {} FROM automation_runs
            WHERE status = 'running' AND resume_at IS NOT NULL AND resume_at <= $1
            ORDER BY resume_at ASC
            LIMIT 100
            "#,
            RUN_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    async fn claim_resume(&self, run_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_runs SET resume_at = NULL
            WHERE id = $1 AND status = 'running' AND resume_at IS NOT NULL
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_step_run(&self, step_run: &StepRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_step_runs
            (id, run_id, step_id, step_type, step_order, status, started_at, completed_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(step_run.id)
        .bind(step_run.run_id)
        .bind(step_run.step_id)
        .bind(&step_run.step_type)
        .bind(step_run.step_order)
        .bind(step_run.status)
        .bind(step_run.started_at)
        .bind(step_run.completed_at)
        .bind(&step_run.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_step_run(
        &self,
        step_run_id: Uuid,
        status: StepRunStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE automation_step_runs
            SET status = $2, error_message = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(step_run_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_step_runs(&self, run_id: Uuid) -> StoreResult<Vec<StepRun>> {
        let step_runs = sqlx::query_as::<_, StepRun>(&format!(
            "SELECT {} FROM automation_step_runs WHERE run_id = $1 ORDER BY step_order ASC",
            STEP_RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(step_runs)
    }

    async fn update_record_stage(&self, target: RecordRef, stage: &str) -> StoreResult<()> {
        let (sql, id) = match target {
            RecordRef::Lead(id) => ("UPDATE leads SET stage = $2, updated_at = NOW() WHERE id = $1", id),
            RecordRef::MultiServiceLead(id) => (
                "UPDATE multi_service_leads SET stage = $2, updated_at = NOW() WHERE id = $1",
                id,
            ),
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(stage)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{:?}", target)));
        }
        Ok(())
    }

    async fn add_record_tag(&self, target: RecordRef, tag_id: Uuid) -> StoreResult<()> {
        let exists_sql = match target {
            RecordRef::Lead(_) => "SELECT EXISTS (SELECT 1 FROM leads WHERE id = $1)",
            RecordRef::MultiServiceLead(_) => "SELECT EXISTS (SELECT 1 FROM multi_service_leads WHERE id = $1)",
        };
        let record_id = match target {
            RecordRef::Lead(id) | RecordRef::MultiServiceLead(id) => id,
        };
        let exists: bool = sqlx::query_scalar(exists_sql)
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(StoreError::NotFound(format!("{:?}", target)));
        }

        let (sql, id) = match target {
            RecordRef::Lead(id) => (
                "INSERT INTO lead_tags (lead_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                id,
            ),
            RecordRef::MultiServiceLead(id) => (
                "INSERT INTO multi_service_lead_tags (multi_service_lead_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                id,
            ),
        };

        sqlx::query(sql)
            .bind(id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_task(&self, task: &TaskEntry) -> StoreResult<()> {
        let (lead_id, multi_service_lead_id) = match task.target {
            Some(RecordRef::Lead(id)) => (Some(id), None),
            Some(RecordRef::MultiServiceLead(id)) => (None, Some(id)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO automation_tasks (id, owner_id, lead_id, multi_service_lead_id, title, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id)
        .bind(task.owner_id)
        .bind(lead_id)
        .bind(multi_service_lead_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
