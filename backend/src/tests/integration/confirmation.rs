// Integration tests for pending runs: render, review, confirm or cancel

use chrono::{Duration, Utc};
use std::sync::Arc;
use regex::Regex;
use tradeflow_shared::{RunStatus, StepRunStatus};
use uuid::Uuid;

use crate::automations::steps::snapshot_from_json;
use crate::automations::{
    AutomationEngine, EngineError, EstimateData, ExecutorDeps, LineItem, StepAction, StepEdit, StepExecutor,
    TokenResolver,
};
use crate::store::{AutomationStore, MemoryStore};
use crate::tests::fixtures::*;
use crate::tests::helpers::{TestContext, BASE_URL};

fn assert_no_tokens(text: &str) {
    let token = Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?\}").unwrap();
    assert!(!token.is_match(text), "unresolved token in {:?}", text);
}

#[cfg(test)]
mod confirmation_integration_tests {
    use super::*;

    async fn estimate_automation(t: &TestContext, owner_id: Uuid) -> Uuid {
        t.store
            .create_automation(&gated_automation(
                owner_id,
                "estimate_sent",
                vec![
                    email_step(
                        1,
                        "Estimate {estimate.number} for {customer_name}",
                        "Total: {estimate.total}\n{estimate.line_items}\n{estimate.link}\n{invoice.pay_button}",
                    ),
                    stage_step(2, "estimate_sent"),
                ],
            ))
            .await
            .unwrap()
            .id
    }

    fn estimate_context(owner_id: Uuid) -> crate::automations::ExecutionContext {
        lead_context(owner_id, "Ava", None, None).with_estimate(
            Uuid::new_v4(),
            EstimateData {
                estimate_number: Some("EST-1042".to_string()),
                customer_email: Some("ava@x.com".to_string()),
                total_cents: Some(45_000),
                line_items: vec![LineItem {
                    description: "Spring cleanup".to_string(),
                    quantity: 1,
                    unit_price_cents: 45_000,
                }],
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_pending_run_renders_without_side_effects() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let automation_id = estimate_automation(&t, owner_id).await;
        let ctx = estimate_context(owner_id);

        let run_id = t.engine.create_pending_run(automation_id, &ctx).await.unwrap();

        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::PendingConfirmation);
        assert!(run.started_at.is_none());
        assert_eq!(run.estimate_id, ctx.estimate_id);

        let snapshot = snapshot_from_json(run.rendered_steps.as_ref().unwrap()).unwrap();
        assert_eq!(snapshot.len(), 2);
        match &snapshot[0].action {
            StepAction::SendEmail(email) => {
                assert_eq!(email.subject, "Estimate EST-1042 for Ava");
                assert_eq!(email.to.as_deref(), Some("ava@x.com"));
                assert!(email.body.contains("$450.00"));
                assert!(email.body.contains(&format!("{}/estimates/{}", BASE_URL, ctx.estimate_id.unwrap())));
                assert!(!email.body.contains("/pay"));
                assert_no_tokens(&email.subject);
                assert_no_tokens(&email.body);
            }
            other => panic!("expected email, got {:?}", other),
        }

        assert!(t.email.sent().is_empty());
        assert!(t.store.list_step_runs(run_id).await.unwrap().is_empty());
        assert_eq!(t.store.record_stage(crate::automations::RecordRef::Lead(ctx.lead_id.unwrap())).await, None);
    }

    #[tokio::test]
    async fn test_confirm_without_edits_sends_snapshot() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let automation_id = estimate_automation(&t, owner_id).await;
        let ctx = t.with_record(estimate_context(owner_id)).await;

        let run_id = t.engine.create_pending_run(automation_id, &ctx).await.unwrap();
        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        let snapshot = snapshot_from_json(run.rendered_steps.as_ref().unwrap()).unwrap();
        let StepAction::SendEmail(rendered) = &snapshot[0].action else {
            panic!("expected email step");
        };

        let summary = t.engine.confirm_pending_run(run_id, &[]).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);

        let sent = t.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ava@x.com");
        assert_eq!(sent[0].subject, rendered.subject);
        assert!(sent[0].html.contains(&rendered.body));

        // Ids survive on the run even though the field snapshot does not
        assert_eq!(
            t.store
                .record_stage(crate::automations::RecordRef::Lead(ctx.lead_id.unwrap()))
                .await
                .as_deref(),
            Some("estimate_sent")
        );

        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.started_at.is_some());
    }

    #[tokio::test]
    async fn test_confirm_with_edit_sends_edited_text() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let automation_id = estimate_automation(&t, owner_id).await;

        let run_id = t
            .engine
            .create_pending_run(automation_id, &estimate_context(owner_id))
            .await
            .unwrap();
        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        let snapshot = snapshot_from_json(run.rendered_steps.as_ref().unwrap()).unwrap();

        let edit = StepEdit {
            step_id: snapshot[0].step_id,
            body: Some("Ava, we knocked 10% off: $405.00".to_string()),
            ..Default::default()
        };
        t.engine.confirm_pending_run(run_id, &[edit]).await.unwrap();

        let sent = t.email.sent();
        assert!(sent[0].html.contains("we knocked 10% off: $405.00"));
        assert!(!sent[0].html.contains("$450.00"));
        assert_eq!(sent[0].subject, "Estimate EST-1042 for Ava");

        // The executed content is what the run keeps
        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        let stored = snapshot_from_json(run.rendered_steps.as_ref().unwrap()).unwrap();
        match &stored[0].action {
            StepAction::SendEmail(email) => assert!(email.body.contains("$405.00")),
            other => panic!("expected email, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_twice_is_rejected() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let automation_id = estimate_automation(&t, owner_id).await;
        let run_id = t
            .engine
            .create_pending_run(automation_id, &estimate_context(owner_id))
            .await
            .unwrap();

        t.engine.confirm_pending_run(run_id, &[]).await.unwrap();
        let second = t.engine.confirm_pending_run(run_id, &[]).await;

        assert!(matches!(
            second,
            Err(EngineError::RunNotPending { status: RunStatus::Completed, .. })
        ));
        assert_eq!(t.email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let automation_id = estimate_automation(&t, owner_id).await;
        let run_id = t
            .engine
            .create_pending_run(automation_id, &estimate_context(owner_id))
            .await
            .unwrap();

        t.engine.cancel_pending_run(run_id).await.unwrap();

        let run = t.store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.completed_at.is_some());

        assert!(matches!(
            t.engine.confirm_pending_run(run_id, &[]).await,
            Err(EngineError::RunNotPending { status: RunStatus::Cancelled, .. })
        ));
        assert!(matches!(
            t.engine.cancel_pending_run(run_id).await,
            Err(EngineError::RunNotPending { .. })
        ));
        assert!(t.email.sent().is_empty());
        assert!(t.store.list_step_runs(run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let t = TestContext::new();
        let ctx = estimate_context(Uuid::new_v4());

        assert!(matches!(
            t.engine.create_pending_run(Uuid::new_v4(), &ctx).await,
            Err(EngineError::AutomationNotFound(_))
        ));
        assert!(matches!(
            t.engine.cancel_pending_run(Uuid::new_v4()).await,
            Err(EngineError::RunNotFound(_))
        ));
        assert!(matches!(
            t.engine.confirm_pending_run(Uuid::new_v4(), &[]).await,
            Err(EngineError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_confirmed_run_keeps_edits_across_a_wait() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let definition = t
            .store
            .create_automation(&gated_automation(
                owner_id,
                "estimate_sent",
                vec![wait_step(1, 2, "days"), email_step(2, "Following up", "Hi {lead.name}")],
            ))
            .await
            .unwrap();

        let run_id = t
            .engine
            .create_pending_run(definition.id, &lead_context(owner_id, "Ava", Some("ava@x.com"), None))
            .await
            .unwrap();
        let email_step_id = definition.steps.iter().find(|s| s.step_order == 2).unwrap().id;

        let summary = t
            .engine
            .confirm_pending_run(
                run_id,
                &[StepEdit {
                    step_id: email_step_id,
                    body: Some("Hi Ava, just checking in".to_string()),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        assert_eq!(summary.status, RunStatus::Running);
        assert!(t.email.sent().is_empty());

        let resumed = t
            .engine
            .resume_due_runs(Utc::now() + Duration::days(3))
            .await
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].status, RunStatus::Completed);

        let sent = t.email.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("Hi Ava, just checking in"));

        let step_runs = t.store.list_step_runs(run_id).await.unwrap();
        assert!(step_runs.iter().all(|s| s.status == StepRunStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_snapshot_save_fails_confirmed_run() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(SnapshotWriteFails(memory.clone()));
        let email = RecordingEmail::new();
        let executor = StepExecutor::new(
            ExecutorDeps {
                store: store.clone(),
                email: email.clone(),
                sms: RecordingSms::new(),
                secrets: Arc::new(PrefixDecryptor),
            },
            TokenResolver::new(BASE_URL),
            "Test Crew",
        );
        let engine = AutomationEngine::new(store, executor);

        let owner_id = Uuid::new_v4();
        let definition = memory
            .create_automation(&gated_automation(owner_id, "estimate_sent", vec![email_step(1, "Hi", "Hello")]))
            .await
            .unwrap();
        let run_id = engine
            .create_pending_run(definition.id, &lead_context(owner_id, "Ava", Some("ava@x.com"), None))
            .await
            .unwrap();

        assert!(matches!(
            engine.confirm_pending_run(run_id, &[]).await,
            Err(EngineError::Store(_))
        ));

        let run = memory.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("snapshot column unavailable"));
        assert!(email.sent().is_empty());
    }
}
