use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::{
    ALERT_DECREASE_THRESHOLD_PCT, ALERT_DEDUP_WINDOW_SECS, ALERT_INCREASE_THRESHOLD_PCT,
};
use crate::db::store;
use crate::error::Result;
use crate::types::{AlertType, PriceSnapshot, Treatment};

/// Compare two consecutive prices (cents) and decide whether the move
/// qualifies for an alert. Thresholds are asymmetric: small rises are common
/// noise, so drops must be steeper to qualify.
pub fn evaluate_change(old_cents: i64, new_cents: i64) -> Option<(AlertType, f64)> {
    if old_cents == 0 {
        return None;
    }
    let pct = (new_cents - old_cents) as f64 / old_cents as f64 * 100.0;
    if pct >= ALERT_INCREASE_THRESHOLD_PCT {
        Some((AlertType::PriceIncrease, pct))
    } else if pct <= ALERT_DECREASE_THRESHOLD_PCT {
        Some((AlertType::PriceDecrease, pct))
    } else {
        None
    }
}

/// Scan every tracked (user, card, treatment) triple, compare its two most
/// recent snapshots, and create deduplicated alerts for significant moves.
/// Returns the number of alerts created.
pub async fn detect_alerts(pool: &SqlitePool, now: i64) -> Result<usize> {
    let tracked = store::tracked_cards(pool).await?;
    let dedup_since = now - ALERT_DEDUP_WINDOW_SECS;
    let mut created = 0usize;

    for item in &tracked {
        let rows = store::latest_two_prices(pool, &item.card_id).await?;
        if rows.len() < 2 {
            continue;
        }

        let newest = snapshot(&rows[0]);
        let previous = snapshot(&rows[1]);
        let treatment = Treatment::parse(&item.treatment);

        let (Some(new_cents), Some(old_cents)) =
            (treatment.select(&newest), treatment.select(&previous))
        else {
            continue;
        };

        let Some((alert_type, pct)) = evaluate_change(old_cents, new_cents) else {
            continue;
        };

        if store::recent_alert_exists(pool, item.user_id, &item.card_id, dedup_since).await? {
            debug!(
                user_id = item.user_id,
                card_id = %item.card_id,
                "alert suppressed by dedup window"
            );
            continue;
        }

        store::insert_alert(
            pool,
            item.user_id,
            &item.card_id,
            alert_type,
            old_cents,
            new_cents,
            pct,
            Some(treatment.as_str()),
            now,
        )
        .await?;
        created += 1;
    }

    if created > 0 {
        info!(created, "price alerts created");
    }
    Ok(created)
}

fn snapshot(row: &crate::db::models::CardPriceRow) -> PriceSnapshot {
    PriceSnapshot {
        usd_cents: row.usd_cents,
        usd_foil_cents: row.usd_foil_cents,
        usd_etched_cents: row.usd_etched_cents,
        fetched_at: row.fetched_at,
    }
}
