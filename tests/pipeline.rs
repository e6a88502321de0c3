//! End-to-end pipeline tests against mock ranking/pricing servers and an
//! in-memory SQLite database.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use edhwatch::alerts;
use edhwatch::config::{Config, DECKLIST_STAGGER};
use edhwatch::db::store;
use edhwatch::error::{AppError, PriceError, ScrapeError};
use edhwatch::jobs::{self, Job, JobContext, JobScheduler};
use edhwatch::limiter::RateLimiter;
use edhwatch::pricing::PriceClient;
use edhwatch::scraper::SourceClient;
use edhwatch::types::PriceSnapshot;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

async fn mem_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    format!("http://{addr}")
}

async fn test_ctx(source_base: &str, pricing_base: &str) -> Arc<JobContext> {
    let cfg = Config {
        source_base_url: source_base.to_string(),
        pricing_base_url: pricing_base.to_string(),
        log_level: "info".to_string(),
        db_path: ":memory:".to_string(),
        api_port: 0,
        source_min_interval: Duration::from_millis(1),
        pricing_min_interval: Duration::from_millis(1),
        scrape_backoff_base: Duration::from_millis(2),
        price_batch_pause: Duration::from_millis(1),
    };
    let limiter = Arc::new(RateLimiter::new(
        cfg.source_min_interval,
        cfg.pricing_min_interval,
    ));
    let pricing = Arc::new(PriceClient::new(&cfg, Arc::clone(&limiter)).unwrap());
    let scraper = SourceClient::new(&cfg, limiter, Arc::clone(&pricing)).unwrap();
    Arc::new(JobContext {
        pool: mem_pool().await,
        scraper,
        pricing,
        cfg,
    })
}

#[derive(Default)]
struct RecordingScheduler {
    scheduled: Mutex<Vec<(Job, Duration)>>,
}

impl JobScheduler for RecordingScheduler {
    fn schedule(&self, job: Job, delay: Duration) {
        self.scheduled.lock().unwrap().push((job, delay));
    }
}

fn ranking_doc(names: &[&str]) -> Value {
    let views: Vec<Value> = names
        .iter()
        .map(|n| {
            json!({
                "name": n,
                "url": format!("/commanders/{}", n.to_lowercase().replace(' ', "-")),
            })
        })
        .collect();
    json!({"container": {"json_dict": {"cardlists": [{"cardviews": views}]}}})
}

fn deck_doc(card_count: usize) -> Value {
    let others: Vec<Value> = (0..card_count - 1)
        .map(|i| json!({"name": format!("Card {i}")}))
        .collect();
    json!({"container": {"json_dict": {"cardlists": [
        {"header": "Commander", "cardviews": [{"name": "The Commander"}]},
        {"header": "Creatures", "cardviews": others},
    ]}}})
}

/// Mock ranking + decklist source. Every deck endpoint serves a document
/// with `deck_cards` entries and bumps `deck_requests`.
fn source_app(
    commanders: Vec<&'static str>,
    deck_cards: Arc<AtomicUsize>,
    deck_requests: Arc<AtomicUsize>,
) -> Router {
    Router::new()
        .route(
            "/api/rankings",
            get(move || {
                let commanders = commanders.clone();
                async move { Json(ranking_doc(&commanders)) }
            }),
        )
        .route(
            "/api/decks/:slug",
            get(move |_: Path<String>| {
                let cards = deck_cards.clone();
                let requests = deck_requests.clone();
                async move {
                    requests.fetch_add(1, Ordering::SeqCst);
                    Json(deck_doc(cards.load(Ordering::SeqCst)))
                }
            }),
        )
}

/// Mock pricing source: ids starting with "missing" 404, everything else is
/// a flat $10.00. The catalog resolves every requested name.
fn pricing_app() -> Router {
    Router::new()
        .route(
            "/cards/:id",
            get(|Path(id): Path<String>| async move {
                if id.starts_with("missing") {
                    Err(StatusCode::NOT_FOUND)
                } else {
                    Ok(Json(json!({"id": id, "prices": {"usd": "10.00", "usd_foil": "25.00"}})))
                }
            }),
        )
        .route(
            "/cards/collection",
            post(|Json(body): Json<Value>| async move {
                let data: Vec<Value> = body["identifiers"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|ident| ident.get("name").and_then(|n| n.as_str()))
                    .map(|name| {
                        json!({"name": name, "id": format!("id-{}", name.to_lowercase().replace(' ', "-"))})
                    })
                    .collect();
                Json(json!({"data": data, "not_found": []}))
            }),
        )
}

// ---------------------------------------------------------------------------
// Discovery + decklist phases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovery_then_decklists_end_to_end() {
    let deck_cards = Arc::new(AtomicUsize::new(80));
    let deck_requests = Arc::new(AtomicUsize::new(0));
    let source = serve(source_app(
        vec!["Atraxa", "Tymna", "Kenrith"],
        deck_cards,
        deck_requests,
    ))
    .await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let recorder = RecordingScheduler::default();
    jobs::discovery::run(&ctx, &recorder).await.unwrap();

    // Three commander rows, ranked in discovery order, not yet scraped.
    let commanders = store::list_commanders(&ctx.pool).await.unwrap();
    assert_eq!(commanders.len(), 3);
    assert_eq!(commanders[0].name, "Atraxa");
    assert_eq!(commanders[0].rank, 1);
    assert_eq!(commanders[2].rank, 3);
    assert!(commanders.iter().all(|c| c.last_scraped_at.is_none()));

    // Decklist jobs staggered at 0h, 1h, 2h in discovery order.
    let scheduled = recorder.scheduled.lock().unwrap().clone();
    assert_eq!(scheduled.len(), 3);
    for (i, (job, delay)) in scheduled.iter().enumerate() {
        assert_eq!(*delay, DECKLIST_STAGGER * i as u32);
        assert!(matches!(job, Job::Decklist { .. }));
    }

    // Execution closed out as a full success at scheduling time.
    let execution = store::list_executions(&ctx.pool, 10).await.unwrap().remove(0);
    assert_eq!(execution.status.as_deref(), Some("success"));
    assert_eq!(execution.commanders_attempted, 3);
    assert_eq!(execution.commanders_succeeded, 3);
    assert_eq!(execution.commanders_failed, 0);
    assert!(execution.finished_at.is_some());

    // Run the three decklist jobs.
    for (job, _) in &scheduled {
        let Job::Decklist {
            commander_id,
            execution_id,
        } = job
        else {
            panic!("expected decklist job");
        };
        jobs::decklist::run(&ctx, *commander_id, *execution_id)
            .await
            .unwrap();
    }

    for commander in &store::list_commanders(&ctx.pool).await.unwrap() {
        let decklist = store::get_decklist(&ctx.pool, commander.id, None)
            .await
            .unwrap()
            .expect("decklist row");
        assert_eq!(decklist.card_count, 80);
        let cards: Vec<edhwatch::types::DeckCard> =
            serde_json::from_str(&decklist.contents).unwrap();
        assert_eq!(cards.len(), 80);
        assert!(cards[0].is_commander);
        // Catalog resolved every name.
        assert!(cards.iter().all(|c| c.card_id.is_some()));
    }
    let rescanned = store::list_commanders(&ctx.pool).await.unwrap();
    assert!(rescanned.iter().all(|c| c.last_scraped_at.is_some()));

    // Children reported their card counts back to the parent run.
    let execution = store::get_execution(&ctx.pool, execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.total_cards_processed, 240);

    // Full-text search reaches the persisted contents.
    let hits = store::search_decklists(&ctx.pool, "Card").await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn repeat_scrape_replaces_decklist_contents() {
    let deck_cards = Arc::new(AtomicUsize::new(90));
    let deck_requests = Arc::new(AtomicUsize::new(0));
    let source = serve(source_app(
        vec!["Atraxa"],
        Arc::clone(&deck_cards),
        deck_requests,
    ))
    .await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let commander_id = store::upsert_commander(
        &ctx.pool,
        "Atraxa",
        1,
        &format!("{source}/commanders/atraxa"),
    )
    .await
    .unwrap();

    jobs::decklist::run(&ctx, commander_id, None).await.unwrap();
    deck_cards.store(76, Ordering::SeqCst);
    jobs::decklist::run(&ctx, commander_id, None).await.unwrap();

    // One row, holding the second scrape's contents.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM decklists")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    let decklist = store::get_decklist(&ctx.pool, commander_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decklist.card_count, 76);
}

#[tokio::test]
async fn discovery_failure_marks_execution_and_reraises() {
    // Ranking endpoint returns a document with no recognizable container.
    let app = Router::new().route("/api/rankings", get(|| async { Json(json!({"nope": 1})) }));
    let source = serve(app).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let recorder = RecordingScheduler::default();
    let err = jobs::discovery::run(&ctx, &recorder).await.unwrap_err();
    assert!(err.to_string().contains("parse error"));

    let execution = store::list_executions(&ctx.pool, 1).await.unwrap().remove(0);
    assert_eq!(execution.status.as_deref(), Some("failure"));
    assert!(execution.error_summary.unwrap().contains("ranking fetch failed"));
    assert!(recorder.scheduled.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deck_429_retries_three_times_then_rate_limit_error() {
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let app = Router::new().route(
        "/api/decks/:slug",
        get(move |_: Path<String>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::TOO_MANY_REQUESTS
            }
        }),
    );
    let source = serve(app).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let err = ctx
        .scraper
        .fetch_commander_decklist(&format!("{source}/commanders/atraxa"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::RateLimit { attempts: 4 }));
    // Initial request plus three backoff retries.
    assert_eq!(requests.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn malformed_ranking_is_parse_error_without_retry() {
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let app = Router::new().route(
        "/api/rankings",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({"container": {"json_dict": {}}}))
            }
        }),
    );
    let source = serve(app).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let err = ctx.scraper.fetch_top_commanders().await.unwrap_err();
    assert!(matches!(err, ScrapeError::Parse(_)));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversized_decklist_is_parse_error() {
    let deck_cards = Arc::new(AtomicUsize::new(120));
    let deck_requests = Arc::new(AtomicUsize::new(0));
    let source = serve(source_app(vec!["Atraxa"], deck_cards, deck_requests)).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    let err = ctx
        .scraper
        .fetch_commander_decklist(&format!("{source}/commanders/atraxa"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Parse(_)));
}

// ---------------------------------------------------------------------------
// Price updates
// ---------------------------------------------------------------------------

async fn track(pool: &SqlitePool, user_id: i64, card_id: &str, treatment: &str) {
    sqlx::query("INSERT INTO collection_items (user_id, card_id, treatment) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(card_id)
        .bind(treatment)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn price_batch_is_idempotent_within_a_day() {
    let source = serve(Router::new()).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    track(&ctx.pool, 1, "c1", "normal").await;
    track(&ctx.pool, 2, "c2", "foil").await;

    jobs::price_update::run(&ctx, None).await.unwrap();
    jobs::price_update::run(&ctx, None).await.unwrap();

    // Second run's idempotency filter dropped both cards.
    for card in ["c1", "c2"] {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_prices WHERE card_id = ?")
            .bind(card)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "{card} should have exactly one snapshot");
    }
}

#[tokio::test]
async fn yesterdays_snapshot_does_not_suppress_todays_fetch() {
    let source = serve(Router::new()).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    track(&ctx.pool, 1, "c1", "normal").await;
    let yesterday = edhwatch::config::now_secs() - 86_400;
    store::insert_price(
        &ctx.pool,
        "c1",
        &PriceSnapshot {
            usd_cents: Some(500),
            usd_foil_cents: None,
            usd_etched_cents: None,
            fetched_at: yesterday,
        },
    )
    .await
    .unwrap();

    jobs::price_update::run(&ctx, None).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_prices WHERE card_id = 'c1'")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn not_found_cards_are_skipped_without_rows() {
    let source = serve(Router::new()).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    track(&ctx.pool, 1, "missing-card", "normal").await;
    track(&ctx.pool, 1, "c1", "normal").await;

    jobs::price_update::run(&ctx, None).await.unwrap();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_prices")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(total, 1);
    let missing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM card_prices WHERE card_id = 'missing-card'")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn single_card_mode_refetches_unconditionally() {
    let source = serve(Router::new()).await;
    let pricing = serve(pricing_app()).await;
    let ctx = test_ctx(&source, &pricing).await;

    jobs::price_update::run(&ctx, Some("c9")).await.unwrap();
    jobs::price_update::run(&ctx, Some("c9")).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_prices WHERE card_id = 'c9'")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

async fn snapshot_count(pool: &SqlitePool, card_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM card_prices WHERE card_id = ?")
        .bind(card_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn rate_limited_card_aborts_batch_and_next_run_resumes() {
    // One card is rate-limited until the flag is cleared; the rest price
    // normally. Cards process in id order: a-early, m-limited, z-late.
    let limited = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&limited);
    let app = Router::new().route(
        "/cards/:id",
        get(move |Path(id): Path<String>| {
            let flag = flag.clone();
            async move {
                if id == "m-limited" && flag.load(Ordering::SeqCst) {
                    Err(StatusCode::TOO_MANY_REQUESTS)
                } else {
                    Ok(Json(json!({"id": id, "prices": {"usd": "10.00"}})))
                }
            }
        }),
    );
    let pricing = serve(app).await;
    let source = serve(Router::new()).await;
    let ctx = test_ctx(&source, &pricing).await;

    track(&ctx.pool, 1, "a-early", "normal").await;
    track(&ctx.pool, 1, "m-limited", "normal").await;
    track(&ctx.pool, 1, "z-late", "normal").await;

    // The whole run aborts at the rate-limited card so the queue can retry;
    // cards after it were never fetched.
    let err = jobs::price_update::run(&ctx, None).await.unwrap_err();
    assert!(matches!(err, AppError::Price(PriceError::RateLimit)));
    assert_eq!(snapshot_count(&ctx.pool, "a-early").await, 1);
    assert_eq!(snapshot_count(&ctx.pool, "m-limited").await, 0);
    assert_eq!(snapshot_count(&ctx.pool, "z-late").await, 0);

    // On retry the idempotency filter skips the already-priced card and the
    // run picks up exactly where it stopped.
    limited.store(false, Ordering::SeqCst);
    jobs::price_update::run(&ctx, None).await.unwrap();
    assert_eq!(snapshot_count(&ctx.pool, "a-early").await, 1);
    assert_eq!(snapshot_count(&ctx.pool, "m-limited").await, 1);
    assert_eq!(snapshot_count(&ctx.pool, "z-late").await, 1);
}

#[tokio::test]
async fn malformed_price_body_fails_one_card_not_the_batch() {
    let app = Router::new().route(
        "/cards/:id",
        get(|Path(id): Path<String>| async move {
            if id == "garbled" {
                // Well-formed JSON without the prices object.
                Json(json!({"object": "error"}))
            } else {
                Json(json!({"id": id, "prices": {"usd": "10.00"}}))
            }
        }),
    );
    let pricing = serve(app).await;
    let source = serve(Router::new()).await;
    let ctx = test_ctx(&source, &pricing).await;

    track(&ctx.pool, 1, "a-early", "normal").await;
    track(&ctx.pool, 1, "garbled", "normal").await;
    track(&ctx.pool, 1, "z-late", "normal").await;

    // The bad card is logged and skipped; the batch completes.
    jobs::price_update::run(&ctx, None).await.unwrap();
    assert_eq!(snapshot_count(&ctx.pool, "a-early").await, 1);
    assert_eq!(snapshot_count(&ctx.pool, "garbled").await, 0);
    assert_eq!(snapshot_count(&ctx.pool, "z-late").await, 1);
}

// ---------------------------------------------------------------------------
// Recurring schedules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recurring_schedule_does_not_fire_at_startup() {
    let recorder = Arc::new(RecordingScheduler::default());
    jobs::spawn_recurring(
        Arc::clone(&recorder),
        Job::Discovery,
        Duration::from_millis(80),
    );

    // The interval's immediate tick is consumed: nothing enqueued yet.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(recorder.scheduled.lock().unwrap().is_empty());

    // One full period later the job arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let scheduled = recorder.scheduled.lock().unwrap();
    assert!(!scheduled.is_empty());
    assert_eq!(scheduled[0].0, Job::Discovery);
}

// ---------------------------------------------------------------------------
// Alert detection
// ---------------------------------------------------------------------------

async fn seed_prices(pool: &SqlitePool, card_id: &str, old_cents: i64, new_cents: i64) {
    let now = edhwatch::config::now_secs();
    for (cents, at) in [(old_cents, now - 7_200), (new_cents, now - 60)] {
        store::insert_price(
            pool,
            card_id,
            &PriceSnapshot {
                usd_cents: Some(cents),
                usd_foil_cents: None,
                usd_etched_cents: None,
                fetched_at: at,
            },
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn qualifying_rise_creates_one_deduplicated_alert() {
    let pool = mem_pool().await;
    track(&pool, 7, "spike", "normal").await;
    seed_prices(&pool, "spike", 1000, 1200).await;

    let now = edhwatch::config::now_secs();
    assert_eq!(alerts::detect_alerts(&pool, now).await.unwrap(), 1);
    // A second qualifying change within 24h is suppressed.
    assert_eq!(alerts::detect_alerts(&pool, now + 60).await.unwrap(), 0);

    let rows = store::list_alerts(&pool, 7, false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].alert_type, "price_increase");
    assert_eq!(rows[0].old_price_cents, 1000);
    assert_eq!(rows[0].new_price_cents, 1200);
}

#[tokio::test]
async fn sub_threshold_moves_create_no_alert() {
    let pool = mem_pool().await;
    track(&pool, 1, "mild-rise", "normal").await;
    track(&pool, 1, "mild-drop", "normal").await;
    seed_prices(&pool, "mild-rise", 1000, 1199).await;
    seed_prices(&pool, "mild-drop", 1000, 701).await;

    let created = alerts::detect_alerts(&pool, edhwatch::config::now_secs())
        .await
        .unwrap();
    assert_eq!(created, 0);
}

#[tokio::test]
async fn steep_drop_creates_decrease_alert() {
    let pool = mem_pool().await;
    track(&pool, 3, "crash", "normal").await;
    seed_prices(&pool, "crash", 1000, 700).await;

    assert_eq!(
        alerts::detect_alerts(&pool, edhwatch::config::now_secs())
            .await
            .unwrap(),
        1
    );
    let rows = store::list_alerts(&pool, 3, false).await.unwrap();
    assert_eq!(rows[0].alert_type, "price_decrease");
}

#[tokio::test]
async fn single_snapshot_cards_are_skipped() {
    let pool = mem_pool().await;
    track(&pool, 1, "lonely", "normal").await;
    store::insert_price(
        &pool,
        "lonely",
        &PriceSnapshot {
            usd_cents: Some(1000),
            usd_foil_cents: None,
            usd_etched_cents: None,
            fetched_at: edhwatch::config::now_secs(),
        },
    )
    .await
    .unwrap();

    assert_eq!(
        alerts::detect_alerts(&pool, edhwatch::config::now_secs())
            .await
            .unwrap(),
        0
    );
}
