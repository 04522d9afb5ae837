use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, Response},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;

use super::fixtures::{PrefixDecryptor, RecordingEmail, RecordingSms};
use crate::automations::{
    AutomationEngine, ExecutionContext, ExecutorDeps, StepExecutor, TokenResolver, TriggerDispatcher,
};
use crate::store::{AutomationStore, MemoryStore};
use crate::AppState;

pub const BASE_URL: &str = "https://app.tradeflow.test";

/// Engine wired to an in-memory store and recording delivery fakes.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub email: Arc<RecordingEmail>,
    pub sms: Arc<RecordingSms>,
    pub engine: Arc<AutomationEngine>,
    pub dispatcher: Arc<TriggerDispatcher>,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let email = RecordingEmail::new();
        let sms = RecordingSms::new();

        let executor = StepExecutor::new(
            ExecutorDeps {
                store: store.clone(),
                email: email.clone(),
                sms: sms.clone(),
                secrets: Arc::new(PrefixDecryptor),
            },
            TokenResolver::new(BASE_URL),
            "Test Crew",
        );

        let engine = Arc::new(AutomationEngine::new(store.clone(), executor));
        let dispatcher = Arc::new(TriggerDispatcher::new(engine.clone()));

        Self {
            store,
            email,
            sms,
            engine,
            dispatcher,
        }
    }

    /// Register the context's lead so stage and tag steps can land on it.
    pub async fn with_record(&self, ctx: ExecutionContext) -> ExecutionContext {
        if let Some(target) = ctx.record_target() {
            self.store.put_record(target).await;
        }
        ctx
    }

    pub fn router(&self) -> Router {
        let store: Arc<dyn AutomationStore> = self.store.clone();
        crate::app_router(Arc::new(AppState {
            db_pool: None,
            store,
            engine: self.engine.clone(),
            dispatcher: self.dispatcher.clone(),
            job_logs: None,
        }))
    }
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    app.clone()
        .oneshot(request.body(body).expect("Failed to build request"))
        .await
        .expect("Router call failed")
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Response was not JSON")
}
