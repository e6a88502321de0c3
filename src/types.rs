use serde::{Deserialize, Serialize};

/// One entry in the weekly top-commanders ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCommander {
    pub name: String,
    /// 1-based position in the ranking.
    pub rank: i64,
    pub url: String,
}

/// One card in a scraped decklist. Persisted verbatim as the JSON contents
/// of a decklist row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckCard {
    pub name: String,
    pub category: String,
    pub is_commander: bool,
    /// External catalog identifier, resolved best-effort after parsing.
    /// None when the catalog lookup could not match the name.
    pub card_id: Option<String>,
    pub source_url: String,
    pub quantity: i64,
}

/// A single point in a card's price time series. All prices in integer
/// cents; a None field means the treatment does not exist for this print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub usd_cents: Option<i64>,
    pub usd_foil_cents: Option<i64>,
    pub usd_etched_cents: Option<i64>,
    pub fetched_at: i64,
}

/// Print variant carrying its own price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
    Normal,
    Foil,
    Etched,
}

impl Treatment {
    pub fn parse(s: &str) -> Self {
        match s {
            "foil" => Treatment::Foil,
            "etched" => Treatment::Etched,
            _ => Treatment::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Treatment::Normal => "normal",
            Treatment::Foil => "foil",
            Treatment::Etched => "etched",
        }
    }

    /// Price for this treatment, falling back to the base price when the
    /// treatment-specific field is absent.
    pub fn select(&self, p: &PriceSnapshot) -> Option<i64> {
        match self {
            Treatment::Normal => p.usd_cents,
            Treatment::Foil => p.usd_foil_cents.or(p.usd_cents),
            Treatment::Etched => p.usd_etched_cents.or(p.usd_cents),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    PriceIncrease,
    PriceDecrease,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceIncrease => "price_increase",
            AlertType::PriceDecrease => "price_decrease",
        }
    }
}

/// Terminal status of a discovery run. Discovery closes out as a full
/// success once scheduling (not scraping) completes, or as a failure; the
/// schema's partial_success value is reserved for operator tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
        }
    }
}
