use tracing::{error, info};

use crate::config::{now_secs, DECKLIST_STAGGER};
use crate::db::store;
use crate::error::Result;
use crate::jobs::{Job, JobContext, JobScheduler};
use crate::types::ExecutionStatus;

/// Weekly discovery run: fetch the ranking, upsert commander rows, and
/// stagger one decklist job per commander.
///
/// Discovery is list-only — it never touches decklist data or
/// last_scraped_at. The expensive per-commander fetches are spread over
/// ~N hours (commander i scheduled at i × 1h) so the decklist endpoint sees
/// an effective concurrency of one.
pub async fn run(ctx: &JobContext, scheduler: &dyn JobScheduler) -> Result<()> {
    let execution_id = store::create_execution(&ctx.pool, now_secs()).await?;

    let commanders = match ctx.scraper.fetch_top_commanders().await {
        Ok(c) => c,
        Err(e) => {
            // Close the run as failed, then surface the error so the queue
            // retries the whole discovery.
            let summary = format!("ranking fetch failed: {e}");
            error!(execution_id, error = %e, "discovery failed");
            store::fail_execution(&ctx.pool, execution_id, &summary, now_secs()).await?;
            return Err(e.into());
        }
    };

    let mut scheduled = 0i64;
    for (index, commander) in commanders.iter().enumerate() {
        let commander_id = match store::upsert_commander(
            &ctx.pool,
            &commander.name,
            commander.rank,
            &commander.url,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                let summary = format!("commander upsert failed for {}: {e}", commander.name);
                error!(execution_id, error = %e, "discovery failed");
                store::fail_execution(&ctx.pool, execution_id, &summary, now_secs()).await?;
                return Err(e);
            }
        };

        scheduler.schedule(
            Job::Decklist {
                commander_id,
                execution_id: Some(execution_id),
            },
            DECKLIST_STAGGER * index as u32,
        );
        scheduled += 1;
    }

    store::finish_execution(
        &ctx.pool,
        execution_id,
        ExecutionStatus::Success,
        scheduled,
        scheduled,
        0,
        now_secs(),
    )
    .await?;

    info!(
        execution_id,
        commanders = scheduled,
        stagger_secs = DECKLIST_STAGGER.as_secs(),
        "discovery complete, decklist jobs scheduled"
    );
    Ok(())
}
