use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::{Config, SCRAPE_MAX_RETRIES, TOP_COMMANDERS_COUNT};
use crate::error::ScrapeError;
use crate::limiter::{RateLimiter, Service};
use crate::pricing::PriceClient;
use crate::scraper::parse::{deck_slug, parse_decklist, parse_top_commanders};
use crate::types::{DeckCard, RankedCommander};

/// Client for the commander ranking/decklist source. Every request goes
/// through the shared rate limiter's slow lane.
pub struct SourceClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    /// Catalog resolver for card name → identifier lookups (the pricing
    /// vendor supplies the catalog).
    catalog: Arc<PriceClient>,
    backoff_base: Duration,
}

impl SourceClient {
    pub fn new(
        cfg: &Config,
        limiter: Arc<RateLimiter>,
        catalog: Arc<PriceClient>,
    ) -> Result<Self, ScrapeError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(8))
            .build()
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.source_base_url.trim_end_matches('/').to_string(),
            limiter,
            catalog,
            backoff_base: cfg.scrape_backoff_base,
        })
    }

    /// Fetch the weekly top-N ranking. One request, no inner retry — a
    /// failure here fails the whole discovery run and the queue retries it.
    pub async fn fetch_top_commanders(&self) -> Result<Vec<RankedCommander>, ScrapeError> {
        self.limiter.throttle(Service::Source).await;

        let url = format!("{}/api/rankings", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ScrapeError::Fetch(format!(
                "ranking endpoint returned {}",
                resp.status()
            )));
        }

        let doc: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScrapeError::Parse(e.to_string()))?;

        let commanders = parse_top_commanders(&doc, &self.base_url)?;
        if commanders.len() < TOP_COMMANDERS_COUNT {
            warn!(
                found = commanders.len(),
                expected = TOP_COMMANDERS_COUNT,
                "ranking returned fewer commanders than expected"
            );
        }
        Ok(commanders)
    }

    /// Fetch and parse one commander's average decklist, then resolve card
    /// identifiers through the catalog (best-effort).
    ///
    /// An HTTP 429 is retried with exponential backoff (base × 2^attempt)
    /// up to SCRAPE_MAX_RETRIES before surfacing RateLimit. This inner loop
    /// is independent of the queue's job-level retry count.
    pub async fn fetch_commander_decklist(
        &self,
        commander_url: &str,
    ) -> Result<Vec<DeckCard>, ScrapeError> {
        let slug = deck_slug(commander_url)?;
        let url = format!("{}/api/decks/{}", self.base_url, slug);

        let mut attempt: u32 = 0;
        let doc: serde_json::Value = loop {
            self.limiter.throttle(Service::Source).await;

            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| ScrapeError::Fetch(e.to_string()))?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt > SCRAPE_MAX_RETRIES {
                    return Err(ScrapeError::RateLimit { attempts: attempt });
                }
                let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                warn!(
                    slug,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "deck endpoint throttled, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
            if !resp.status().is_success() {
                return Err(ScrapeError::Fetch(format!(
                    "deck endpoint returned {}",
                    resp.status()
                )));
            }

            break resp
                .json()
                .await
                .map_err(|e| ScrapeError::Parse(e.to_string()))?;
        };

        let mut cards = parse_decklist(&doc, &url)?;
        self.resolve_card_ids(&mut cards).await;
        debug!(slug, cards = cards.len(), "decklist fetched");
        Ok(cards)
    }

    /// Best-effort: attach catalog identifiers to every card we can match.
    /// Unresolved names keep card_id = None rather than failing the deck.
    async fn resolve_card_ids(&self, cards: &mut [DeckCard]) {
        let names: Vec<String> = cards.iter().map(|c| c.name.clone()).collect();
        let resolved = self.catalog.resolve_collection(&names).await;

        let mut misses = 0usize;
        for card in cards.iter_mut() {
            match resolved.get(&card.name.to_lowercase()) {
                Some(id) => card.card_id = Some(id.clone()),
                None => misses += 1,
            }
        }
        if misses > 0 {
            warn!(misses, total = cards.len(), "catalog left cards unresolved");
        }
    }
}
