// Integration tests for trigger matching and sibling isolation

use tradeflow_shared::RunStatus;
use uuid::Uuid;

use crate::store::{AutomationStore, NewAutomation};
use crate::tests::fixtures::*;
use crate::tests::helpers::TestContext;

#[cfg(test)]
mod dispatcher_integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_only_active_matching_automations_of_owner_run() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();

        t.store
            .create_automation(&automation(owner_id, "lead_created", vec![task_step(1, "matched")]))
            .await
            .unwrap();
        t.store
            .create_automation(&automation(owner_id, "invoice_paid", vec![task_step(1, "other trigger")]))
            .await
            .unwrap();
        t.store
            .create_automation(&NewAutomation {
                is_active: false,
                ..automation(owner_id, "lead_created", vec![task_step(1, "inactive")])
            })
            .await
            .unwrap();
        t.store
            .create_automation(&automation(Uuid::new_v4(), "lead_created", vec![task_step(1, "other owner")]))
            .await
            .unwrap();

        let outcome = t
            .dispatcher
            .trigger_automations("lead_created", &random_lead_context(owner_id), false)
            .await
            .unwrap();

        assert_eq!(outcome.runs.len(), 1);
        let titles: Vec<String> = t.store.tasks().await.into_iter().map(|task| task.title).collect();
        assert_eq!(titles, vec!["matched".to_string()]);
    }

    #[tokio::test]
    async fn test_no_matches_is_empty_outcome() {
        let t = TestContext::new();
        let outcome = t
            .dispatcher
            .trigger_automations("lead_created", &random_lead_context(Uuid::new_v4()), true)
            .await
            .unwrap();

        assert!(outcome.runs.is_empty());
        assert!(outcome.pending_run_ids.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failing_sibling_does_not_block_others() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let ctx = random_lead_context(owner_id);
        let address = ctx.recipient_email().unwrap().to_string();
        t.email.reject(&address);

        let failing = t
            .store
            .create_automation(&automation(owner_id, "lead_created", vec![email_step(1, "Hi", "Hello")]))
            .await
            .unwrap();
        let healthy = t
            .store
            .create_automation(&automation(owner_id, "lead_created", vec![stage_step(1, "new")]))
            .await
            .unwrap();

        let outcome = t.dispatcher.trigger_automations("lead_created", &ctx, false).await.unwrap();
        assert_eq!(outcome.runs.len(), 2);

        let status_of = |id: Uuid| outcome.runs.iter().find(|r| r.automation_id == id).unwrap().status;
        assert_eq!(status_of(failing.id), RunStatus::Failed);
        assert_eq!(status_of(healthy.id), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_gated_automation_waits_only_for_manual_triggers() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        let gated = t
            .store
            .create_automation(&gated_automation(owner_id, "estimate_sent", vec![email_step(1, "Hi {first_name}", "Quote: {price}")]))
            .await
            .unwrap();
        t.store
            .create_automation(&automation(owner_id, "estimate_sent", vec![task_step(1, "Follow up")]))
            .await
            .unwrap();

        let ctx = random_lead_context(owner_id);

        let manual = t.dispatcher.trigger_automations("estimate_sent", &ctx, true).await.unwrap();
        assert_eq!(manual.pending_run_ids.len(), 1);
        assert_eq!(manual.runs.len(), 1);
        assert!(t.email.sent().is_empty());

        let pending = t.store.get_run(manual.pending_run_ids[0]).await.unwrap().unwrap();
        assert_eq!(pending.automation_id, gated.id);
        assert_eq!(pending.status, RunStatus::PendingConfirmation);

        // The same automation fired by the system runs straight away
        let automatic = t.dispatcher.trigger_automations("estimate_sent", &ctx, false).await.unwrap();
        assert!(automatic.pending_run_ids.is_empty());
        assert_eq!(automatic.runs.len(), 2);
        assert_eq!(t.email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_trigger_creates_independent_runs() {
        let t = TestContext::new();
        let owner_id = Uuid::new_v4();
        t.store
            .create_automation(&automation(owner_id, "lead_created", vec![email_step(1, "Welcome", "Thanks!")]))
            .await
            .unwrap();

        let ctx = random_lead_context(owner_id);
        let first = t.dispatcher.trigger_automations("lead_created", &ctx, false).await.unwrap();
        let second = t.dispatcher.trigger_automations("lead_created", &ctx, false).await.unwrap();

        assert_ne!(first.runs[0].run_id, second.runs[0].run_id);
        assert_eq!(t.email.sent().len(), 2);
        assert_eq!(t.store.list_runs(owner_id, None).await.unwrap().len(), 2);
    }
}
