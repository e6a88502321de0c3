use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::trace;

/// The two external services the pipeline talks to, each with its own
/// request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Ranking + decklist source (slow budget, ~1 request / 2s).
    Source,
    /// Pricing / catalog source (fast budget, ~1 request / 100ms).
    Pricing,
}

struct Lane {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

/// Process-wide throttle shared by every concurrent job execution.
///
/// Each lane's mutex is held across the deficit sleep, so two callers can
/// never both observe the interval as satisfied: the second caller blocks on
/// the lock until the first has slept and stamped its request time.
pub struct RateLimiter {
    source: Lane,
    pricing: Lane,
}

impl RateLimiter {
    pub fn new(source_min_interval: Duration, pricing_min_interval: Duration) -> Self {
        Self {
            source: Lane {
                min_interval: source_min_interval,
                last_request: Mutex::new(None),
            },
            pricing: Lane {
                min_interval: pricing_min_interval,
                last_request: Mutex::new(None),
            },
        }
    }

    /// Block until at least `min_interval` has elapsed since the last
    /// request (by any caller) to `service`, then stamp now as the new
    /// last-request time.
    pub async fn throttle(&self, service: Service) {
        let lane = match service {
            Service::Source => &self.source,
            Service::Pricing => &self.pricing,
        };

        let mut last = lane.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < lane.min_interval {
                let wait = lane.min_interval - elapsed;
                trace!(?service, wait_ms = wait.as_millis() as u64, "throttling");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
