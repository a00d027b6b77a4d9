use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod database;
mod error;
mod handlers;
mod integrations;
mod jobs;
mod notifications;
mod workflows;


use integrations::{http_client, HttpCommissionService, HttpInventoryService, PgOrderDirectory};
use notifications::{EmailNotificationChannel, LogNotificationChannel};
use workflows::{HookDispatcher, NotificationChannel, OrderDirectory, PgWorkflowStore, WorkflowEngine};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub engine: WorkflowEngine,
    pub orders: Arc<dyn OrderDirectory>,
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Marketplace Order Workflow API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let collaborators = &config.collaborators;
    let client = http_client(collaborators.hook_timeout);
    let notifier: Arc<dyn NotificationChannel> = if config.smtp.is_configured() {
        Arc::new(EmailNotificationChannel::new(&config.smtp, collaborators.role_mailboxes.clone()))
    } else {
        tracing::warn!("SMTP is not configured, notifications will only be logged");
        Arc::new(LogNotificationChannel)
    };

    let hooks = HookDispatcher::new(
        Arc::new(HttpInventoryService::new(client.clone(), &collaborators.inventory_service_url)),
        Arc::new(HttpCommissionService::new(client, &collaborators.commission_service_url)),
        notifier,
        collaborators.hook_timeout,
    );
    let orders: Arc<dyn OrderDirectory> = Arc::new(PgOrderDirectory::new(db_pool.clone()));
    let engine = WorkflowEngine::new(
        Arc::new(PgWorkflowStore::new(db_pool.clone())),
        orders.clone(),
        hooks,
    );

    let mut scheduler = jobs::JobScheduler::new(engine.clone(), jobs::JobConfig::from_env()).await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        engine,
        orders,
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.shutdown().await?;

    Ok(())
}
