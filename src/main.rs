mod config;
mod db;
mod diff;
mod error;
mod feed;
mod history;
mod orchestrator;
mod persistence;
mod tasks;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok(); // .ok() — missing .env file is fine in production

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env();

    let pool = db::create_pool(&config.database_url, config.max_db_connections)
        .await
        .expect("failed to connect to database and run migrations");

    tracing::info!(
        max_concurrent_crawls = config.max_concurrent_crawls,
        scheduler_tick_secs = config.scheduler_tick_secs,
        "feedkeep starting"
    );

    tasks::spawn_scheduler(pool, Arc::new(config));

    // The scheduler owns the process's only real work; block forever so the
    // tokio runtime (and the scheduler task it drives) stays alive.
    std::future::pending::<()>().await;
}
