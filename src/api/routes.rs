use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::store;
use crate::error::AppError;
use crate::jobs::{Job, JobScheduler, QueueHandle};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub queue: QueueHandle,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Manual triggers: enqueue the corresponding job immediately.
        .route("/jobs/discovery", post(trigger_discovery))
        .route("/jobs/decklist/:commander_id", post(trigger_decklist))
        .route("/jobs/prices", post(trigger_price_batch))
        .route("/jobs/prices/:card_id", post(trigger_price_single))
        // Reads over the pipeline's produced data.
        .route("/commanders", get(get_commanders))
        .route("/decklists/search", get(search_decklists))
        .route("/prices/:card_id", get(get_price_history))
        .route("/alerts", get(get_alerts))
        .route("/executions", get(get_executions))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Deserialize)]
pub struct PriceHistoryQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    pub user_id: i64,
    pub include_dismissed: Option<bool>,
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EnqueuedResponse {
    pub enqueued: &'static str,
}

#[derive(Serialize)]
pub struct CommanderResponse {
    pub id: i64,
    pub name: String,
    pub rank: i64,
    pub source_url: String,
    pub last_scraped_at: Option<i64>,
}

#[derive(Serialize)]
pub struct DecklistResponse {
    pub id: i64,
    pub commander_id: i64,
    pub partner_id: Option<i64>,
    pub card_count: i64,
    pub updated_at: i64,
}

#[derive(Serialize)]
pub struct PricePointResponse {
    pub usd_cents: Option<i64>,
    pub usd_foil_cents: Option<i64>,
    pub usd_etched_cents: Option<i64>,
    pub fetched_at: i64,
}

#[derive(Serialize)]
pub struct AlertResponse {
    pub id: i64,
    pub card_id: String,
    pub alert_type: String,
    pub old_price_cents: i64,
    pub new_price_cents: i64,
    pub percentage_change: f64,
    pub treatment: Option<String>,
    pub dismissed: bool,
    pub created_at: i64,
}

#[derive(Serialize)]
pub struct ExecutionResponse {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: Option<String>,
    pub commanders_attempted: i64,
    pub commanders_succeeded: i64,
    pub commanders_failed: i64,
    pub total_cards_processed: i64,
    pub execution_time_seconds: Option<i64>,
    pub success_rate: f64,
    pub error_summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn trigger_discovery(State(state): State<ApiState>) -> Json<EnqueuedResponse> {
    state.queue.schedule(Job::Discovery, Duration::ZERO);
    Json(EnqueuedResponse { enqueued: "discovery" })
}

async fn trigger_decklist(
    State(state): State<ApiState>,
    Path(commander_id): Path<i64>,
) -> Json<EnqueuedResponse> {
    state.queue.schedule(
        Job::Decklist {
            commander_id,
            execution_id: None,
        },
        Duration::ZERO,
    );
    Json(EnqueuedResponse { enqueued: "decklist" })
}

async fn trigger_price_batch(State(state): State<ApiState>) -> Json<EnqueuedResponse> {
    state.queue.schedule(Job::PriceUpdate { card_id: None }, Duration::ZERO);
    Json(EnqueuedResponse { enqueued: "price_update" })
}

async fn trigger_price_single(
    State(state): State<ApiState>,
    Path(card_id): Path<String>,
) -> Json<EnqueuedResponse> {
    state.queue.schedule(
        Job::PriceUpdate { card_id: Some(card_id) },
        Duration::ZERO,
    );
    Json(EnqueuedResponse { enqueued: "price_update" })
}

async fn get_commanders(
    State(state): State<ApiState>,
) -> Result<Json<Vec<CommanderResponse>>, AppError> {
    let rows = store::list_commanders(&state.pool).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| CommanderResponse {
                id: r.id,
                name: r.name,
                rank: r.rank,
                source_url: r.source_url,
                last_scraped_at: r.last_scraped_at,
            })
            .collect(),
    ))
}

async fn search_decklists(
    State(state): State<ApiState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<DecklistResponse>>, AppError> {
    let rows = store::search_decklists(&state.pool, &params.q).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| DecklistResponse {
                id: r.id,
                commander_id: r.commander_id,
                partner_id: r.partner(),
                card_count: r.card_count,
                updated_at: r.updated_at,
            })
            .collect(),
    ))
}

async fn get_price_history(
    State(state): State<ApiState>,
    Path(card_id): Path<String>,
    Query(params): Query<PriceHistoryQuery>,
) -> Result<Json<Vec<PricePointResponse>>, AppError> {
    let start = params.start.unwrap_or(0);
    let end = params.end.unwrap_or(i64::MAX);
    let rows = store::prices_for_date_range(&state.pool, &card_id, start, end).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| PricePointResponse {
                usd_cents: r.usd_cents,
                usd_foil_cents: r.usd_foil_cents,
                usd_etched_cents: r.usd_etched_cents,
                fetched_at: r.fetched_at,
            })
            .collect(),
    ))
}

async fn get_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<AlertResponse>>, AppError> {
    let rows = store::list_alerts(
        &state.pool,
        params.user_id,
        params.include_dismissed.unwrap_or(false),
    )
    .await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| AlertResponse {
                id: r.id,
                card_id: r.card_id,
                alert_type: r.alert_type,
                old_price_cents: r.old_price_cents,
                new_price_cents: r.new_price_cents,
                percentage_change: r.percentage_change,
                treatment: r.treatment,
                dismissed: r.dismissed != 0,
                created_at: r.created_at,
            })
            .collect(),
    ))
}

async fn get_executions(
    State(state): State<ApiState>,
    Query(params): Query<ExecutionsQuery>,
) -> Result<Json<Vec<ExecutionResponse>>, AppError> {
    let rows = store::list_executions(&state.pool, params.limit.unwrap_or(20)).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| {
                let execution_time_seconds = r.execution_time_seconds();
                let success_rate = r.success_rate();
                ExecutionResponse {
                    id: r.id,
                    started_at: r.started_at,
                    finished_at: r.finished_at,
                    status: r.status,
                    commanders_attempted: r.commanders_attempted,
                    commanders_succeeded: r.commanders_succeeded,
                    commanders_failed: r.commanders_failed,
                    total_cards_processed: r.total_cards_processed,
                    execution_time_seconds,
                    success_rate,
                    error_summary: r.error_summary,
                }
            })
            .collect(),
    ))
}
