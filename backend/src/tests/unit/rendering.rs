// Unit tests for rendering full step snapshots from a context

use chrono::NaiveDate;
use uuid::Uuid;

use crate::automations::steps::{render_all, snapshot_from_json, snapshot_to_json};
use crate::automations::{
    BusinessData, ExecutionContext, InvoiceData, StepAction, TokenResolver, WorkOrderData,
};
use crate::store::AutomationStore;
use crate::tests::fixtures::*;
use crate::tests::helpers::BASE_URL;

#[cfg(test)]
mod rendering_tests {
    use super::*;

    fn invoice_context() -> ExecutionContext {
        ExecutionContext::for_owner(Uuid::new_v4())
            .with_work_order(
                Uuid::new_v4(),
                WorkOrderData {
                    work_order_number: Some("WO-77".to_string()),
                    customer_name: Some("Ben Ortiz".to_string()),
                    customer_phone: Some("+15550002222".to_string()),
                    scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 4),
                    ..Default::default()
                },
            )
            .with_invoice(
                Uuid::new_v4(),
                InvoiceData {
                    invoice_number: Some("INV-9".to_string()),
                    customer_email: Some("ben@example.com".to_string()),
                    amount_due_cents: Some(18_999),
                    ..Default::default()
                },
            )
            .with_business(BusinessData {
                name: Some("Green Acres".to_string()),
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn test_invoice_snapshot_resolves_every_field() {
        let t = crate::tests::helpers::TestContext::new();
        let definition = t
            .store
            .create_automation(&automation(
                Uuid::new_v4(),
                "invoice_sent",
                vec![
                    email_step(1, "{business_name}: invoice {invoice_number}", "Hi {first_name}, {amount_due} is due. {payment_link}"),
                    sms_step(2, "{business.name}: we arrive {work_order.scheduled_date} for {work_order.number}"),
                    task_step(3, "Chase {invoice.number} {estimate.number}"),
                ],
            ))
            .await
            .unwrap();

        let ctx = invoice_context();
        let steps = render_all(&definition.steps, &TokenResolver::new(BASE_URL), &ctx);

        match &steps[0].action {
            StepAction::SendEmail(email) => {
                assert_eq!(email.subject, "Green Acres: invoice INV-9");
                assert!(email.body.starts_with("Hi Ben, $189.99 is due."));
                assert!(email.body.contains(&format!("{}/invoices/{}/pay", BASE_URL, ctx.invoice_id.unwrap())));
                assert_eq!(email.to.as_deref(), Some("ben@example.com"));
            }
            other => panic!("expected email, got {:?}", other),
        }
        match &steps[1].action {
            StepAction::SendSms(sms) => {
                assert_eq!(sms.body, "Green Acres: we arrive March 4, 2026 for WO-77");
                assert_eq!(sms.to.as_deref(), Some("+15550002222"));
            }
            other => panic!("expected sms, got {:?}", other),
        }
        match &steps[2].action {
            StepAction::CreateTask(task) => assert_eq!(task.title, "Chase INV-9 "),
            other => panic!("expected task, got {:?}", other),
        }

        // Snapshot survives storage unchanged
        let restored = snapshot_from_json(&snapshot_to_json(&steps).unwrap()).unwrap();
        assert_eq!(restored, steps);
    }

    #[test]
    fn test_rendering_is_not_recursive() {
        let ctx = lead_context(Uuid::new_v4(), "{invoice.number}", Some("x@example.com"), None);
        let resolver = TokenResolver::new(BASE_URL);
        assert_eq!(resolver.resolve("Hello {lead.name}", &ctx), "Hello {invoice.number}");
    }
}
