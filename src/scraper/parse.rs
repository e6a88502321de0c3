use serde_json::Value;

use crate::config::{DECKLIST_MAX_CARDS, DECKLIST_MIN_CARDS, TOP_COMMANDERS_COUNT};
use crate::error::ScrapeError;
use crate::types::{DeckCard, RankedCommander};

/// Parse the ranking endpoint's nested document into a top-N list.
///
/// Expected shape: `container.json_dict.cardlists[0].cardviews[]`, each view
/// carrying `name` and `url`. Rank is the position in the list, 1-based.
pub fn parse_top_commanders(
    doc: &Value,
    base_url: &str,
) -> Result<Vec<RankedCommander>, ScrapeError> {
    let cardlists = doc
        .get("container")
        .and_then(|c| c.get("json_dict"))
        .and_then(|j| j.get("cardlists"))
        .and_then(|c| c.as_array())
        .ok_or_else(|| {
            ScrapeError::Parse("ranking document missing container.json_dict.cardlists".to_string())
        })?;

    let views = cardlists
        .first()
        .and_then(|l| l.get("cardviews"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| ScrapeError::Parse("ranking cardlist has no cardviews".to_string()))?;

    let mut commanders = Vec::new();
    for view in views.iter().take(TOP_COMMANDERS_COUNT) {
        let Some(name) = view.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let Some(url) = view.get("url").and_then(|u| u.as_str()) else {
            continue;
        };
        let url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), url)
        };
        commanders.push(RankedCommander {
            name: name.to_string(),
            rank: commanders.len() as i64 + 1,
            url,
        });
    }

    if commanders.is_empty() {
        return Err(ScrapeError::Parse(
            "ranking document contained zero commanders".to_string(),
        ));
    }

    Ok(commanders)
}

/// Parse a deck document into a flat card list annotated with category and
/// commander flag, then validate the entry count against the plausible
/// window (average-deck payloads merge basics, so an exact count is wrong).
pub fn parse_decklist(doc: &Value, deck_url: &str) -> Result<Vec<DeckCard>, ScrapeError> {
    let cardlists = doc
        .get("container")
        .and_then(|c| c.get("json_dict"))
        .and_then(|j| j.get("cardlists"))
        .and_then(|c| c.as_array())
        .ok_or_else(|| {
            ScrapeError::Parse("deck document missing container.json_dict.cardlists".to_string())
        })?;

    let mut cards = Vec::new();
    for list in cardlists {
        let category = list
            .get("header")
            .and_then(|h| h.as_str())
            .unwrap_or("Unknown")
            .to_string();
        let is_commander = category.eq_ignore_ascii_case("commander")
            || category.eq_ignore_ascii_case("commanders");

        let Some(views) = list.get("cardviews").and_then(|v| v.as_array()) else {
            continue;
        };
        for view in views {
            let Some(name) = view.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let quantity = view.get("quantity").and_then(|q| q.as_i64()).unwrap_or(1);
            cards.push(DeckCard {
                name: name.to_string(),
                category: category.clone(),
                is_commander,
                card_id: None,
                source_url: deck_url.to_string(),
                quantity,
            });
        }
    }

    if cards.len() < DECKLIST_MIN_CARDS || cards.len() > DECKLIST_MAX_CARDS {
        return Err(ScrapeError::Parse(format!(
            "decklist had {} entries, expected {}..={}",
            cards.len(),
            DECKLIST_MIN_CARDS,
            DECKLIST_MAX_CARDS
        )));
    }

    Ok(cards)
}

/// Resolve the deck slug from a commander URL: the last non-empty path
/// segment. `https://host/commanders/atraxa-praetors-voice` → `atraxa-…`.
pub fn deck_slug(commander_url: &str) -> Result<&str, ScrapeError> {
    commander_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .ok_or_else(|| {
            ScrapeError::Parse(format!("cannot derive deck slug from {commander_url}"))
        })
}
