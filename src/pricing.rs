use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{Config, CATALOG_BATCH_SIZE, PRICE_MAX_RETRIES};
use crate::error::PriceError;
use crate::limiter::{RateLimiter, Service};
use crate::types::PriceSnapshot;

/// Client for the card pricing source (which also hosts the name→identifier
/// catalog). Uses the rate limiter's fast lane.
pub struct PriceClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl PriceClient {
    pub fn new(cfg: &Config, limiter: Arc<RateLimiter>) -> Result<Self, PriceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(8))
            .build()
            .map_err(|e| PriceError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.pricing_base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    /// Fetch the current price snapshot for one card. A 404 is a first-class
    /// "not found" (Ok(None)); callers skip persistence rather than failing.
    /// Transient connection failures are retried up to PRICE_MAX_RETRIES
    /// with doubling backoff before surfacing Network.
    pub async fn fetch(&self, card_id: &str) -> Result<Option<PriceSnapshot>, PriceError> {
        let url = format!("{}/cards/{}", self.base_url, card_id);

        let mut attempt: u32 = 0;
        let resp = loop {
            self.limiter.throttle(Service::Pricing).await;

            match self.http.get(&url).send().await {
                Ok(r) => break r,
                Err(e) if e.is_timeout() => return Err(PriceError::Timeout(e.to_string())),
                Err(e) if e.is_connect() => {
                    attempt += 1;
                    if attempt > PRICE_MAX_RETRIES {
                        return Err(PriceError::Network(e.to_string()));
                    }
                    let backoff = Duration::from_millis(250) * 2u32.pow(attempt - 1);
                    warn!(
                        card_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "pricing connection failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(PriceError::Network(e.to_string())),
            }
        };

        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => return Err(PriceError::RateLimit),
            s if !s.is_success() => {
                return Err(PriceError::Network(format!("pricing endpoint returned {s}")))
            }
            _ => {}
        }

        let doc: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PriceError::InvalidResponse(e.to_string()))?;

        let prices = doc
            .get("prices")
            .ok_or_else(|| PriceError::InvalidResponse("missing prices object".to_string()))?;

        let snapshot = PriceSnapshot {
            usd_cents: price_field_cents(prices, "usd"),
            usd_foil_cents: price_field_cents(prices, "usd_foil"),
            usd_etched_cents: price_field_cents(prices, "usd_etched"),
            fetched_at: crate::config::now_secs(),
        };
        debug!(card_id, ?snapshot.usd_cents, "price fetched");
        Ok(Some(snapshot))
    }

    /// Batch name→identifier lookup, best-effort: a failed chunk logs a
    /// warning and leaves its names unresolved. Keys in the returned map are
    /// lowercased card names.
    pub async fn resolve_collection(&self, names: &[String]) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        let url = format!("{}/cards/collection", self.base_url);

        for chunk in names.chunks(CATALOG_BATCH_SIZE) {
            self.limiter.throttle(Service::Pricing).await;

            let identifiers: Vec<_> = chunk.iter().map(|n| json!({ "name": n })).collect();
            let body = json!({ "identifiers": identifiers });

            let resp = match self.http.post(&url).json(&body).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(status = %r.status(), "catalog chunk rejected");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "catalog chunk failed");
                    continue;
                }
            };

            let doc: serde_json::Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "catalog chunk returned invalid JSON");
                    continue;
                }
            };

            let Some(data) = doc.get("data").and_then(|d| d.as_array()) else {
                continue;
            };
            for entry in data {
                let (Some(name), Some(id)) = (
                    entry.get("name").and_then(|n| n.as_str()),
                    entry.get("id").and_then(|i| i.as_str()),
                ) else {
                    continue;
                };
                resolved.insert(name.to_lowercase(), id.to_string());
            }
        }

        resolved
    }
}

/// Convert a decimal-dollar string field ("12.34") to integer cents.
/// Absent or null fields mean the treatment does not exist for this print.
fn price_field_cents(prices: &serde_json::Value, field: &str) -> Option<i64> {
    prices
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(dollars_to_cents)
}

fn dollars_to_cents(s: &str) -> Option<i64> {
    let dollars: f64 = s.trim().parse().ok()?;
    if !dollars.is_finite() || dollars < 0.0 {
        return None;
    }
    Some((dollars * 100.0).round() as i64)
}
