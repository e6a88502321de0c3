use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Failure taxonomy for the ranking/decklist scraper. Callers route their
/// retry behavior off these three variants, never off transport details.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Connectivity or HTTP-level failure (timeouts, refused connections,
    /// non-2xx statuses other than 429).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The response body does not match the expected document shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP 429 persisted through the full backoff schedule.
    #[error("rate limited after {attempts} attempts")]
    RateLimit { attempts: u32 },
}

/// Failure taxonomy for the pricing client. "Card not found" is not an
/// error — `PriceClient::fetch` returns `Ok(None)` for a 404.
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by pricing source")]
    RateLimit,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("price error: {0}")]
    Price(#[from] PriceError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Classify a pricing-client error for the price batch loop: rate-limit and
/// network/timeout failures abort the whole run, anything else is per-card.
pub fn is_fatal_for_run(e: &PriceError) -> bool {
    matches!(
        e,
        PriceError::RateLimit | PriceError::Network(_) | PriceError::Timeout(_)
    )
}
