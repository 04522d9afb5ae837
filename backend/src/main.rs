use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod automations;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod services;
mod store;

pub use error::{ApiError, ApiResult, AppError};


use automations::{AutomationEngine, ExecutorDeps, StepExecutor, TokenResolver, TriggerDispatcher};
use services::{
    EmailProvider, EncryptionService, FailoverEmailService, HttpEmailProvider, SmtpEmailProvider,
    TwilioSmsFactory,
};
use store::{AutomationStore, PgAutomationStore};

pub struct AppState {
    /// Absent when the store is not Postgres-backed.
    pub db_pool: Option<sqlx::PgPool>,
    pub store: Arc<dyn AutomationStore>,
    pub engine: Arc<AutomationEngine>,
    pub dispatcher: Arc<TriggerDispatcher>,
    pub job_logs: Option<Arc<RwLock<Vec<jobs::JobExecutionLog>>>>,
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "TradeFlow Automation API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automations", handlers::automation_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn email_service(config: &config::Config) -> anyhow::Result<FailoverEmailService> {
    let mut providers: Vec<Box<dyn EmailProvider>> = Vec::new();

    if config.smtp.is_configured() {
        providers.push(Box::new(SmtpEmailProvider::new(&config.smtp)?));
    } else {
        tracing::warn!("SMTP not configured, skipping SMTP email provider");
    }

    if let Some(api) = &config.email_api {
        providers.push(Box::new(HttpEmailProvider::new(api.clone())?));
    }

    if providers.is_empty() {
        tracing::warn!("No email provider configured, automation emails will fail");
    }

    Ok(FailoverEmailService::new(providers))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(db_pool.clone()));

    let email = email_service(&config)?;
    tracing::info!("Email delivery configured with {} providers", email.provider_count());

    let secrets = EncryptionService::from_key(&config.encryption_key)
        .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY: {}", e))?;

    let executor = StepExecutor::new(
        ExecutorDeps {
            store: store.clone(),
            email: Arc::new(email),
            sms: Arc::new(TwilioSmsFactory::new(config.sms_api_base_url.clone())),
            secrets: Arc::new(secrets),
        },
        TokenResolver::new(&config.app_base_url),
        config.automations.fallback_from_name.clone(),
    );

    let engine = Arc::new(AutomationEngine::new(store.clone(), executor));
    let dispatcher = Arc::new(TriggerDispatcher::new(engine.clone()));

    let mut scheduler = jobs::JobScheduler::new(engine.clone(), jobs::JobConfig::from(&config.automations)).await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool: Some(db_pool),
        store,
        engine,
        dispatcher,
        job_logs: Some(scheduler.execution_logs()),
    });

    let app = app_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.shutdown().await?;

    Ok(())
}
