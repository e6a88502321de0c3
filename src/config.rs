use std::time::Duration;

use crate::error::{AppError, Result};

pub const SOURCE_BASE_URL: &str = "https://edhrec.com";
pub const PRICING_BASE_URL: &str = "https://api.scryfall.com";

/// Fixed size of the weekly top-commanders list. Fewer results are logged
/// but tolerated; zero results is a parse failure.
pub const TOP_COMMANDERS_COUNT: usize = 20;

/// Plausible entry count for an average decklist. The source merges basic
/// lands and occasionally drops a category, so an exact-100 check rejects
/// real payloads. Outside this window the payload is considered malformed.
pub const DECKLIST_MIN_CARDS: usize = 75;
pub const DECKLIST_MAX_CARDS: usize = 100;

/// Inner 429 retry ceiling on decklist fetches, independent of queue-level
/// job retries.
pub const SCRAPE_MAX_RETRIES: u32 = 3;

/// Transient-connection retry ceiling inside the pricing client.
pub const PRICE_MAX_RETRIES: u32 = 3;

/// Gap between consecutive scheduled decklist scrapes. Discovery schedules
/// commander i at `i * DECKLIST_STAGGER`, spreading N fetches over ~N hours.
pub const DECKLIST_STAGGER: Duration = Duration::from_secs(3600);

/// Price update batching: fetch this many cards, then pause.
pub const PRICE_BATCH_SIZE: usize = 50;

/// Catalog resolver batch limit (the vendor caps collection lookups at 75).
pub const CATALOG_BATCH_SIZE: usize = 75;

/// Alert thresholds, in percent. Asymmetric: drops must be steeper than
/// rises to qualify.
pub const ALERT_INCREASE_THRESHOLD_PCT: f64 = 20.0;
pub const ALERT_DECREASE_THRESHOLD_PCT: f64 = -30.0;

/// Suppress a second alert for the same (user, card) within this window.
pub const ALERT_DEDUP_WINDOW_SECS: i64 = 24 * 3600;

/// Recurring schedule intervals.
pub const DISCOVERY_INTERVAL_SECS: u64 = 7 * 24 * 3600;
pub const PRICE_UPDATE_INTERVAL_SECS: u64 = 24 * 3600;

/// Queue worker pool size. Jobs are independent units; two workers keep a
/// slow decklist scrape from starving the price batch.
pub const QUEUE_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub source_base_url: String,
    pub pricing_base_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Minimum gap between requests to the ranking/decklist source.
    pub source_min_interval: Duration,
    /// Minimum gap between requests to the pricing source.
    pub pricing_min_interval: Duration,
    /// Base delay for the scraper's inner 429 backoff (doubles per attempt).
    pub scrape_backoff_base: Duration,
    /// Pause between price batches.
    pub price_batch_pause: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source_base_url: std::env::var("SOURCE_BASE_URL")
                .unwrap_or_else(|_| SOURCE_BASE_URL.to_string()),
            pricing_base_url: std::env::var("PRICING_BASE_URL")
                .unwrap_or_else(|_| PRICING_BASE_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "edhwatch.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            source_min_interval: Duration::from_millis(
                std::env::var("SOURCE_MIN_INTERVAL_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse::<u64>()
                    .unwrap_or(2000),
            ),
            pricing_min_interval: Duration::from_millis(
                std::env::var("PRICING_MIN_INTERVAL_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse::<u64>()
                    .unwrap_or(100),
            ),
            scrape_backoff_base: Duration::from_millis(
                std::env::var("SCRAPE_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse::<u64>()
                    .unwrap_or(1000),
            ),
            price_batch_pause: Duration::from_millis(
                std::env::var("PRICE_BATCH_PAUSE_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse::<u64>()
                    .unwrap_or(2000),
            ),
        })
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Midnight (UTC) of the calendar day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(86_400)
}
