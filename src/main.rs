use std::sync::Arc;
use std::time::Duration;

use dorm_ledger::api::{create_router, AppState};
use dorm_ledger::config::Settings;
use dorm_ledger::notify::LogNotifier;
use dorm_ledger::observability::{init_logging, init_metrics, LogFormat};
use dorm_ledger::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(
        &settings.application.log_level,
        LogFormat::from(settings.application.log_format.as_str()),
    );
    info!("Configuration loaded");

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    let metrics_handle = init_metrics();

    let store = Arc::new(PgStore::new(pool));
    let state = AppState::new(store, settings.gateway.clone(), Arc::new(LogNotifier))
        .with_metrics(metrics_handle);
    let router = create_router(state);

    let addr = format!("0.0.0.0:{}", settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, router).await?;

    Ok(())
}
