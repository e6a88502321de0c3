use tracing::{error, info, warn};

use crate::alerts;
use crate::config::{day_start, now_secs, PRICE_BATCH_SIZE};
use crate::db::store;
use crate::error::{is_fatal_for_run, Result};
use crate::jobs::JobContext;

/// Price update job. With a card id: targeted single-card refresh. Without:
/// the daily batch over every card tracked by any collection.
pub async fn run(ctx: &JobContext, card_id: Option<&str>) -> Result<()> {
    match card_id {
        Some(id) => update_one(ctx, id).await,
        None => update_batch(ctx).await,
    }
}

async fn update_one(ctx: &JobContext, card_id: &str) -> Result<()> {
    match ctx.pricing.fetch(card_id).await? {
        Some(snapshot) => {
            store::insert_price(&ctx.pool, card_id, &snapshot).await?;
            info!(card_id, "price refreshed");
        }
        None => warn!(card_id, "pricing source has no such card"),
    }
    Ok(())
}

/// Batch algorithm: collect tracked ids, drop any already priced today
/// (re-running after a partial failure is safe and non-duplicating), then
/// fetch sequentially in paced batches. Rate-limit and network errors abort
/// the run for queue-level retry; the idempotency filter resumes where the
/// previous attempt stopped. Any other per-card error is logged and skipped.
async fn update_batch(ctx: &JobContext) -> Result<()> {
    let tracked = store::distinct_tracked_card_ids(&ctx.pool).await?;
    let today = day_start(now_secs());
    let already_priced = store::card_ids_priced_since(&ctx.pool, today).await?;

    let pending: Vec<String> = tracked
        .into_iter()
        .filter(|id| !already_priced.contains(id))
        .collect();

    info!(
        pending = pending.len(),
        skipped = already_priced.len(),
        "price batch starting"
    );

    let mut updated = 0usize;
    let mut missing = 0usize;
    let mut failed = 0usize;

    for (batch_index, batch) in pending.chunks(PRICE_BATCH_SIZE).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(ctx.cfg.price_batch_pause).await;
        }

        for card_id in batch {
            match ctx.pricing.fetch(card_id).await {
                Ok(Some(snapshot)) => {
                    store::insert_price(&ctx.pool, card_id, &snapshot).await?;
                    updated += 1;
                }
                Ok(None) => {
                    // Absent from the catalog: skip, no row.
                    missing += 1;
                }
                Err(e) if is_fatal_for_run(&e) => {
                    warn!(card_id, error = %e, "aborting price batch for queue retry");
                    return Err(e.into());
                }
                Err(e) => {
                    failed += 1;
                    warn!(card_id, error = %e, "card price fetch failed, continuing");
                }
            }
        }
    }

    info!(updated, missing, failed, "price batch complete");

    // Alert detection must never cost us the prices we just fetched.
    if let Err(e) = alerts::detect_alerts(&ctx.pool, now_secs()).await {
        error!(error = %e, "alert detection failed after price batch");
    }

    Ok(())
}
