use tracing::{info, warn};

use crate::config::now_secs;
use crate::db::store;
use crate::error::Result;
use crate::jobs::JobContext;

/// Per-commander decklist scrape. Runs as its own queue entry so one
/// commander's failure is retried in isolation and never blocks siblings.
pub async fn run(ctx: &JobContext, commander_id: i64, execution_id: Option<i64>) -> Result<()> {
    let Some(commander) = store::get_commander(&ctx.pool, commander_id).await? else {
        // Commander deleted between scheduling and execution; retrying
        // would never succeed.
        warn!(commander_id, "decklist job for unknown commander, skipping");
        return Ok(());
    };

    let cards = match ctx.scraper.fetch_commander_decklist(&commander.source_url).await {
        Ok(cards) => cards,
        Err(e) => {
            warn!(
                commander = %commander.name,
                error = %e,
                "decklist scrape failed, leaving retry to the queue"
            );
            return Err(e.into());
        }
    };

    // Timestamp update + contents replace are one transaction: a crash
    // mid-write cannot leave the commander marked scraped without contents.
    let card_count = cards.len() as i64;
    store::save_decklist(&ctx.pool, commander_id, None, &cards, now_secs()).await?;

    if let Some(execution_id) = execution_id {
        if let Err(e) = store::add_cards_processed(&ctx.pool, execution_id, card_count).await {
            warn!(execution_id, error = %e, "failed to report card count to execution");
        }
    }

    info!(commander = %commander.name, cards = card_count, "decklist persisted");
    Ok(())
}
