pub mod decklist;
pub mod discovery;
pub mod price_update;

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, PriceError, ScrapeError};
use crate::pricing::PriceClient;
use crate::scraper::SourceClient;

/// One schedulable unit of work. Discovery fans out Decklist entries; a
/// PriceUpdate without a card id is the daily batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Discovery,
    Decklist {
        commander_id: i64,
        /// Parent discovery run, so the child can report card counts back.
        execution_id: Option<i64>,
    },
    PriceUpdate {
        card_id: Option<String>,
    },
}

impl Job {
    fn describe(&self) -> String {
        match self {
            Job::Discovery => "discovery".to_string(),
            Job::Decklist { commander_id, .. } => format!("decklist[{commander_id}]"),
            Job::PriceUpdate { card_id: Some(id) } => format!("price_update[{id}]"),
            Job::PriceUpdate { card_id: None } => "price_update[batch]".to_string(),
        }
    }
}

/// Scheduling seam between jobs and the queue, so discovery's fan-out can be
/// tested against a recording scheduler.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, job: Job, delay: Duration);
}

struct QueueEntry {
    job: Job,
    attempt: u32,
}

/// Handle onto the queue. Cloneable; scheduling never blocks the caller —
/// delayed entries are armed by a spawned sleep-then-send task.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl QueueHandle {
    fn send(&self, entry: QueueEntry) {
        if self.tx.send(entry).is_err() {
            error!("job queue closed, entry dropped");
        }
    }

    fn send_after(&self, entry: QueueEntry, delay: Duration) {
        if delay.is_zero() {
            self.send(entry);
            return;
        }
        let tx = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tx.send(entry);
        });
    }
}

impl JobScheduler for QueueHandle {
    fn schedule(&self, job: Job, delay: Duration) {
        self.send_after(QueueEntry { job, attempt: 0 }, delay);
    }
}

impl<T: JobScheduler + ?Sized> JobScheduler for Arc<T> {
    fn schedule(&self, job: Job, delay: Duration) {
        (**self).schedule(job, delay);
    }
}

/// Arm a recurring schedule: enqueue `job` every `period`. The interval's
/// immediate first tick is consumed, so a restart loop does not burst the
/// external sources — the first enqueue happens one full period after start
/// (the manual trigger endpoints cover run-it-now needs).
pub fn spawn_recurring<S>(scheduler: S, job: Job, period: Duration)
where
    S: JobScheduler + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // consume immediate first tick
        loop {
            ticker.tick().await;
            scheduler.schedule(job.clone(), Duration::ZERO);
        }
    });
}

/// Everything a job execution needs. Shared across all workers.
pub struct JobContext {
    pub pool: SqlitePool,
    pub scraper: SourceClient,
    pub pricing: Arc<PriceClient>,
    pub cfg: Config,
}

/// Start the worker pool and return the scheduling handle. Workers pull
/// entries off a shared channel; one entry's failure never affects another —
/// a failed entry is re-enqueued with backoff per its retry policy.
pub fn start_queue(ctx: Arc<JobContext>, workers: usize) -> QueueHandle {
    let (tx, rx) = mpsc::unbounded_channel::<QueueEntry>();
    let handle = QueueHandle { tx };
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers {
        let ctx = Arc::clone(&ctx);
        let rx = Arc::clone(&rx);
        let handle = handle.clone();
        tokio::spawn(async move {
            loop {
                let entry = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(entry) = entry else { break };
                execute_entry(&ctx, &handle, entry, worker_id).await;
            }
        });
    }

    handle
}

async fn execute_entry(ctx: &JobContext, handle: &QueueHandle, entry: QueueEntry, worker_id: usize) {
    let label = entry.job.describe();
    info!(worker = worker_id, job = %label, attempt = entry.attempt, "job started");

    let result = run_job(ctx, handle, &entry.job).await;
    match result {
        Ok(()) => info!(worker = worker_id, job = %label, "job finished"),
        Err(e) => {
            let policy = retry_policy(&entry.job, &e);
            let next_attempt = entry.attempt + 1;
            if next_attempt < policy.max_attempts {
                let backoff = policy.base_delay * 2u32.pow(entry.attempt);
                warn!(
                    job = %label,
                    error = %e,
                    next_attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "job failed, retrying"
                );
                handle.send_after(
                    QueueEntry {
                        job: entry.job,
                        attempt: next_attempt,
                    },
                    backoff,
                );
            } else {
                error!(job = %label, error = %e, attempts = next_attempt, "job failed permanently");
            }
        }
    }
}

async fn run_job(ctx: &JobContext, scheduler: &dyn JobScheduler, job: &Job) -> crate::error::Result<()> {
    match job {
        Job::Discovery => discovery::run(ctx, scheduler).await,
        Job::Decklist {
            commander_id,
            execution_id,
        } => decklist::run(ctx, *commander_id, *execution_id).await,
        Job::PriceUpdate { card_id } => price_update::run(ctx, card_id.as_deref()).await,
    }
}

/// Queue-level retry policy, declared per job type and keyed off the error
/// taxonomy rather than raw error strings.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

fn retry_policy(job: &Job, err: &AppError) -> RetryPolicy {
    match (job, err) {
        // Rate limits get more headroom: the source recovers on its own.
        (Job::PriceUpdate { .. }, AppError::Price(PriceError::RateLimit)) => RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
        },
        (Job::PriceUpdate { .. }, AppError::Price(_)) => RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        },
        (_, AppError::Scrape(ScrapeError::RateLimit { .. })) => RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(120),
        },
        _ => RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        },
    }
}
