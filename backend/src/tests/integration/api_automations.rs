// Integration tests for the automation API endpoints

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::store::AutomationStore;
use crate::tests::fixtures::*;
use crate::tests::helpers::{read_json, send_json, TestContext};

#[cfg(test)]
mod automation_api_tests {
    use super::*;

    fn create_payload(owner_id: Uuid, requires_confirmation: bool) -> serde_json::Value {
        json!({
            "owner_id": owner_id,
            "name": "New lead welcome",
            "trigger_type": "lead_created",
            "requires_confirmation": requires_confirmation,
            "steps": [
                {"step_type": "update_stage", "step_order": 2, "config": {"new_stage": "contacted"}},
                {"step_type": "send_email", "step_order": 1, "config": {"subject": "Hi {lead.name}", "body": "Your quote is {lead.price}"}}
            ]
        })
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let t = TestContext::new();
        let response = send_json(&t.router(), Method::GET, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "not_configured");
    }

    #[tokio::test]
    async fn test_create_and_fetch_automation() {
        let t = TestContext::new();
        let app = t.router();
        let owner_id = Uuid::new_v4();

        let response = send_json(&app, Method::POST, "/api/v1/automations", Some(create_payload(owner_id, false))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["steps"][0]["step_type"], "send_email");

        let response = send_json(&app, Method::GET, &format!("/api/v1/automations/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send_json(&app, Method::GET, &format!("/api/v1/automations?owner_id={}", owner_id), None).await;
        let listed = read_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let response = send_json(
            &app,
            Method::PUT,
            &format!("/api/v1/automations/{}/active", id),
            Some(json!({"is_active": false})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send_json(&app, Method::DELETE, &format!("/api/v1/automations/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send_json(&app, Method::GET, &format!("/api/v1/automations/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(read_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_orders_and_bad_config() {
        let t = TestContext::new();
        let app = t.router();
        let owner_id = Uuid::new_v4();

        let mut duplicate = create_payload(owner_id, false);
        duplicate["steps"][0]["step_order"] = json!(1);
        let response = send_json(&app, Method::POST, "/api/v1/automations", Some(duplicate)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = read_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["details"]["steps"].is_array());

        let mut bad_config = create_payload(owner_id, false);
        bad_config["steps"][0]["config"] = json!({"new_stage": 42});
        let response = send_json(&app, Method::POST, "/api/v1/automations", Some(bad_config)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert!(t.store.list_automations(owner_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_then_inspect_run() {
        let t = TestContext::new();
        let app = t.router();
        let owner_id = Uuid::new_v4();
        send_json(&app, Method::POST, "/api/v1/automations", Some(create_payload(owner_id, false))).await;

        let lead_id = Uuid::new_v4();
        let response = send_json(
            &app,
            Method::POST,
            "/api/v1/automations/trigger",
            Some(json!({
                "trigger_type": "lead_created",
                "context": {
                    "owner_id": owner_id,
                    "lead_id": lead_id,
                    "lead_data": {"name": "Ava", "email": "ava@x.com", "calculated_price": 5000}
                }
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = read_json(response).await;
        assert_eq!(outcome["runs"][0]["status"], "completed");
        let run_id = outcome["runs"][0]["run_id"].as_str().unwrap().to_string();

        assert_eq!(t.email.sent()[0].subject, "Hi Ava");

        let response = send_json(&app, Method::GET, &format!("/api/v1/automations/runs/{}", run_id), None).await;
        let detail = read_json(response).await;
        assert_eq!(detail["status"], "completed");
        assert_eq!(detail["step_runs"].as_array().unwrap().len(), 2);

        let response = send_json(
            &app,
            Method::GET,
            &format!("/api/v1/automations/runs?owner_id={}&status=completed", owner_id),
            None,
        )
        .await;
        assert_eq!(read_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_and_cancel_endpoints() {
        let t = TestContext::new();
        let app = t.router();
        let owner_id = Uuid::new_v4();
        send_json(&app, Method::POST, "/api/v1/automations", Some(create_payload(owner_id, true))).await;

        let trigger = json!({
            "trigger_type": "lead_created",
            "is_manual_trigger": true,
            "context": {
                "owner_id": owner_id,
                "lead_id": Uuid::new_v4(),
                "lead_data": {"name": "Ava", "email": "ava@x.com"}
            }
        });

        let first = read_json(send_json(&app, Method::POST, "/api/v1/automations/trigger", Some(trigger.clone())).await).await;
        let second = read_json(send_json(&app, Method::POST, "/api/v1/automations/trigger", Some(trigger)).await).await;
        let to_confirm = first["pending_run_ids"][0].as_str().unwrap().to_string();
        let to_cancel = second["pending_run_ids"][0].as_str().unwrap().to_string();

        let response = send_json(&app, Method::POST, &format!("/api/v1/automations/runs/{}/confirm", to_confirm), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "completed");
        assert_eq!(t.email.sent().len(), 1);

        let response = send_json(&app, Method::POST, &format!("/api/v1/automations/runs/{}/cancel", to_cancel), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send_json(&app, Method::POST, &format!("/api/v1/automations/runs/{}/confirm", to_cancel), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(read_json(response).await["code"], "RUN_NOT_PENDING");

        let response = send_json(
            &app,
            Method::POST,
            &format!("/api/v1/automations/runs/{}/cancel", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_confirm_endpoint_applies_edits() {
        let t = TestContext::new();
        let app = t.router();
        let owner_id = Uuid::new_v4();
        let definition = t
            .store
            .create_automation(&gated_automation(owner_id, "lead_created", vec![email_step(1, "Hi {lead.name}", "Original")]))
            .await
            .unwrap();
        let run_id = t
            .engine
            .create_pending_run(definition.id, &lead_context(owner_id, "Ava", Some("ava@x.com"), None))
            .await
            .unwrap();

        let response = send_json(
            &app,
            Method::POST,
            &format!("/api/v1/automations/runs/{}/confirm", run_id),
            Some(json!({"edited_steps": [{"step_id": definition.steps[0].id, "body": "Edited by office"}]})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(t.email.sent()[0].html.contains("Edited by office"));
    }
}
