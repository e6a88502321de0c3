use std::collections::HashSet;

use sqlx::{Row, SqlitePool};

use crate::db::models::{
    CardPriceRow, CommanderRow, DecklistRow, PriceAlertRow, ScraperExecutionRow, TrackedCardRow,
};
use crate::error::Result;
use crate::types::{AlertType, DeckCard, ExecutionStatus, PriceSnapshot};

// ---------------------------------------------------------------------------
// Commanders
// ---------------------------------------------------------------------------

/// Upsert by name: re-discovery updates rank and URL on the existing row,
/// never touching last_scraped_at (discovery is list-only).
pub async fn upsert_commander(
    pool: &SqlitePool,
    name: &str,
    rank: i64,
    source_url: &str,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO commanders (name, rank, source_url)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            rank = excluded.rank,
            source_url = excluded.source_url
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(rank)
    .bind(source_url)
    .fetch_one(pool)
    .await?;

    Ok(row.get::<i64, _>("id"))
}

pub async fn get_commander(pool: &SqlitePool, id: i64) -> Result<Option<CommanderRow>> {
    let row = sqlx::query_as::<_, CommanderRow>("SELECT * FROM commanders WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_commanders(pool: &SqlitePool) -> Result<Vec<CommanderRow>> {
    let rows = sqlx::query_as::<_, CommanderRow>("SELECT * FROM commanders ORDER BY rank ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Decklists
// ---------------------------------------------------------------------------

/// Replace a commander's decklist and stamp last_scraped_at, atomically.
///
/// Keyed by (commander, partner); a repeat scrape overwrites the row's
/// contents rather than appending a second decklist. The full-text row is
/// rebuilt in the same transaction so search never observes stale contents.
pub async fn save_decklist(
    pool: &SqlitePool,
    commander_id: i64,
    partner_id: Option<i64>,
    cards: &[DeckCard],
    now: i64,
) -> Result<i64> {
    let contents = serde_json::to_string(cards)?;
    let partner_key = partner_id.unwrap_or(0);

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE commanders SET last_scraped_at = ? WHERE id = ?")
        .bind(now)
        .bind(commander_id)
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query(
        r#"
        INSERT INTO decklists (commander_id, partner_id, contents, card_count, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(commander_id, partner_id) DO UPDATE SET
            contents = excluded.contents,
            card_count = excluded.card_count,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(commander_id)
    .bind(partner_key)
    .bind(&contents)
    .bind(cards.len() as i64)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    let decklist_id = row.get::<i64, _>("id");

    let mut names: Vec<String> = Vec::with_capacity(cards.len() + 2);
    for id in [Some(commander_id), partner_id].into_iter().flatten() {
        if let Some(r) = sqlx::query("SELECT name FROM commanders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        {
            names.push(r.get::<String, _>("name"));
        }
    }
    names.extend(cards.iter().map(|c| c.name.clone()));
    let search_text = names.join(" ");

    sqlx::query("DELETE FROM decklist_search WHERE decklist_id = ?")
        .bind(decklist_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO decklist_search (decklist_id, search_text) VALUES (?, ?)")
        .bind(decklist_id)
        .bind(&search_text)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(decklist_id)
}

pub async fn get_decklist(
    pool: &SqlitePool,
    commander_id: i64,
    partner_id: Option<i64>,
) -> Result<Option<DecklistRow>> {
    let row = sqlx::query_as::<_, DecklistRow>(
        "SELECT * FROM decklists WHERE commander_id = ? AND partner_id = ?",
    )
    .bind(commander_id)
    .bind(partner_id.unwrap_or(0))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Full-text search over decklist contents + commander names.
pub async fn search_decklists(pool: &SqlitePool, query: &str) -> Result<Vec<DecklistRow>> {
    let rows = sqlx::query_as::<_, DecklistRow>(
        r#"
        SELECT d.*
        FROM decklist_search
        JOIN decklists d ON d.id = decklist_search.decklist_id
        WHERE decklist_search MATCH ?
        "#,
    )
    .bind(query)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Scraper executions
// ---------------------------------------------------------------------------

pub async fn create_execution(pool: &SqlitePool, started_at: i64) -> Result<i64> {
    let row = sqlx::query("INSERT INTO scraper_executions (started_at) VALUES (?) RETURNING id")
        .bind(started_at)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("id"))
}

pub async fn finish_execution(
    pool: &SqlitePool,
    id: i64,
    status: ExecutionStatus,
    attempted: i64,
    succeeded: i64,
    failed: i64,
    finished_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scraper_executions
        SET status = ?, commanders_attempted = ?, commanders_succeeded = ?,
            commanders_failed = ?, finished_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(attempted)
    .bind(succeeded)
    .bind(failed)
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_execution(
    pool: &SqlitePool,
    id: i64,
    error_summary: &str,
    finished_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scraper_executions
        SET status = 'failure', error_summary = ?, finished_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error_summary)
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Child decklist jobs report their card counts back to the parent run.
pub async fn add_cards_processed(pool: &SqlitePool, id: i64, cards: i64) -> Result<()> {
    sqlx::query(
        "UPDATE scraper_executions SET total_cards_processed = total_cards_processed + ? WHERE id = ?",
    )
    .bind(cards)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_execution(pool: &SqlitePool, id: i64) -> Result<Option<ScraperExecutionRow>> {
    let row = sqlx::query_as::<_, ScraperExecutionRow>(
        "SELECT * FROM scraper_executions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_executions(pool: &SqlitePool, limit: i64) -> Result<Vec<ScraperExecutionRow>> {
    let rows = sqlx::query_as::<_, ScraperExecutionRow>(
        "SELECT * FROM scraper_executions ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Card prices (append-only)
// ---------------------------------------------------------------------------

pub async fn insert_price(pool: &SqlitePool, card_id: &str, p: &PriceSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO card_prices (card_id, usd_cents, usd_foil_cents, usd_etched_cents, fetched_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(card_id)
    .bind(p.usd_cents)
    .bind(p.usd_foil_cents)
    .bind(p.usd_etched_cents)
    .bind(p.fetched_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// The two most recent snapshots, newest first.
pub async fn latest_two_prices(pool: &SqlitePool, card_id: &str) -> Result<Vec<CardPriceRow>> {
    let rows = sqlx::query_as::<_, CardPriceRow>(
        "SELECT * FROM card_prices WHERE card_id = ? ORDER BY fetched_at DESC, id DESC LIMIT 2",
    )
    .bind(card_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn prices_for_date_range(
    pool: &SqlitePool,
    card_id: &str,
    start: i64,
    end: i64,
) -> Result<Vec<CardPriceRow>> {
    let rows = sqlx::query_as::<_, CardPriceRow>(
        r#"
        SELECT * FROM card_prices
        WHERE card_id = ? AND fetched_at >= ? AND fetched_at <= ?
        ORDER BY fetched_at ASC
        "#,
    )
    .bind(card_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Card ids that already have a snapshot at or after `since` — the
/// idempotency filter input for the price batch.
pub async fn card_ids_priced_since(pool: &SqlitePool, since: i64) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT DISTINCT card_id FROM card_prices WHERE fetched_at >= ?")
        .bind(since)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("card_id")).collect())
}

// ---------------------------------------------------------------------------
// Collections (read-only for the pipeline)
// ---------------------------------------------------------------------------

pub async fn distinct_tracked_card_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT card_id FROM collection_items ORDER BY card_id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("card_id")).collect())
}

pub async fn tracked_cards(pool: &SqlitePool) -> Result<Vec<TrackedCardRow>> {
    let rows = sqlx::query_as::<_, TrackedCardRow>(
        "SELECT DISTINCT user_id, card_id, treatment FROM collection_items",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Price alerts
// ---------------------------------------------------------------------------

/// True if the user already has an alert for this card created at or after
/// `since` (the 24h dedup window).
pub async fn recent_alert_exists(
    pool: &SqlitePool,
    user_id: i64,
    card_id: &str,
    since: i64,
) -> Result<bool> {
    let row = sqlx::query(
        "SELECT 1 FROM price_alerts WHERE user_id = ? AND card_id = ? AND created_at >= ? LIMIT 1",
    )
    .bind(user_id)
    .bind(card_id)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_alert(
    pool: &SqlitePool,
    user_id: i64,
    card_id: &str,
    alert_type: AlertType,
    old_price_cents: i64,
    new_price_cents: i64,
    percentage_change: f64,
    treatment: Option<&str>,
    created_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO price_alerts (
            user_id, card_id, alert_type, old_price_cents, new_price_cents,
            percentage_change, treatment, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(card_id)
    .bind(alert_type.as_str())
    .bind(old_price_cents)
    .bind(new_price_cents)
    .bind(percentage_change)
    .bind(treatment)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_alerts(
    pool: &SqlitePool,
    user_id: i64,
    include_dismissed: bool,
) -> Result<Vec<PriceAlertRow>> {
    let rows = sqlx::query_as::<_, PriceAlertRow>(
        r#"
        SELECT * FROM price_alerts
        WHERE user_id = ? AND (? OR dismissed = 0)
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(include_dismissed)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
