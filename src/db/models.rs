/// Database row types for the pipeline tables. Used by sqlx for typed
/// queries via the runtime `query_as` API.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommanderRow {
    pub id: i64,
    pub name: String,
    pub rank: i64,
    pub source_url: String,
    pub last_scraped_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DecklistRow {
    pub id: i64,
    pub commander_id: i64,
    /// 0 means a solo commander (see migration note on NULL uniqueness).
    pub partner_id: i64,
    /// JSON array of DeckCard entries.
    pub contents: String,
    pub card_count: i64,
    pub updated_at: i64,
}

impl DecklistRow {
    pub fn partner(&self) -> Option<i64> {
        (self.partner_id != 0).then_some(self.partner_id)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScraperExecutionRow {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: Option<String>,
    pub commanders_attempted: i64,
    pub commanders_succeeded: i64,
    pub commanders_failed: i64,
    pub total_cards_processed: i64,
    pub error_summary: Option<String>,
}

impl ScraperExecutionRow {
    /// Wall-clock duration of the run; None while still running.
    pub fn execution_time_seconds(&self) -> Option<i64> {
        self.finished_at.map(|f| f - self.started_at)
    }

    pub fn success_rate(&self) -> f64 {
        if self.commanders_attempted == 0 {
            return 0.0;
        }
        self.commanders_succeeded as f64 / self.commanders_attempted as f64 * 100.0
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardPriceRow {
    pub id: i64,
    pub card_id: String,
    pub usd_cents: Option<i64>,
    pub usd_foil_cents: Option<i64>,
    pub usd_etched_cents: Option<i64>,
    pub fetched_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriceAlertRow {
    pub id: i64,
    pub user_id: i64,
    pub card_id: String,
    pub alert_type: String,
    pub old_price_cents: i64,
    pub new_price_cents: i64,
    pub percentage_change: f64,
    pub treatment: Option<String>,
    pub dismissed: i64,
    pub dismissed_at: Option<i64>,
    pub created_at: i64,
}

/// One tracked (user, card, treatment) triple from the inventory tables.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackedCardRow {
    pub user_id: i64,
    pub card_id: String,
    pub treatment: String,
}
