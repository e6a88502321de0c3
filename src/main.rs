use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edhwatch::api::routes::{router, ApiState};
use edhwatch::config::{Config, DISCOVERY_INTERVAL_SECS, PRICE_UPDATE_INTERVAL_SECS, QUEUE_WORKERS};
use edhwatch::error::Result;
use edhwatch::jobs::{spawn_recurring, start_queue, Job, JobContext};
use edhwatch::limiter::RateLimiter;
use edhwatch::pricing::PriceClient;
use edhwatch::scraper::SourceClient;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared rate limiter + clients ---
    let limiter = Arc::new(RateLimiter::new(
        cfg.source_min_interval,
        cfg.pricing_min_interval,
    ));
    let pricing = Arc::new(PriceClient::new(&cfg, Arc::clone(&limiter))?);
    let scraper = SourceClient::new(&cfg, Arc::clone(&limiter), Arc::clone(&pricing))?;

    // --- Job queue worker pool ---
    let ctx = Arc::new(JobContext {
        pool: pool.clone(),
        scraper,
        pricing,
        cfg: cfg.clone(),
    });
    let queue = start_queue(ctx, QUEUE_WORKERS);
    info!(workers = QUEUE_WORKERS, "job queue started");

    // --- Recurring schedules ---
    spawn_recurring(
        queue.clone(),
        Job::Discovery,
        Duration::from_secs(DISCOVERY_INTERVAL_SECS),
    );
    spawn_recurring(
        queue.clone(),
        Job::PriceUpdate { card_id: None },
        Duration::from_secs(PRICE_UPDATE_INTERVAL_SECS),
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        queue,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
