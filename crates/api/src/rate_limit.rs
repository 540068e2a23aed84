//! Per-client sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, TimeDelta, Utc};
use common::{Clock, SystemClock};
use parking_lot::Mutex;

use crate::error::ApiError;

/// Key used when the client address cannot be determined.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Remembers the request times of each client within the current window.
///
/// Expired timestamps are dropped lazily whenever a client is checked;
/// [`RateLimiter::compact`] sweeps clients that went quiet.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            clock,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request from `client` if it is within its allowance.
    /// Returns false, recording nothing, when the window is full.
    pub fn check(&self, client: &str) -> bool {
        let now = self.clock.now();
        let mut hits = self.hits.lock();
        let recent = hits.entry(client.to_string()).or_default();
        expire(recent, now, self.window);

        if recent.len() >= self.max_requests {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Drops expired timestamps for every client and forgets clients with
    /// none left. Returns how many clients were forgotten.
    pub fn compact(&self) -> usize {
        let now = self.clock.now();
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, recent| {
            expire(recent, now, self.window);
            !recent.is_empty()
        });
        before - hits.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.hits.lock().len()
    }

    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(Duration::MAX)
    }
}

/// Timestamps are pushed in order, so expired ones are at the front.
fn expire(recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: TimeDelta) {
    while recent.front().is_some_and(|ts| now - *ts >= window) {
        recent.pop_front();
    }
}

/// First `X-Forwarded-For` address, then `X-Real-IP`, then
/// [`ANONYMOUS_CLIENT`].
pub fn client_key(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

/// Middleware rejecting over-limit clients before any other work happens.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(request.headers());
    if !limiter.check(&client) {
        metrics::counter!("rate_limited_total").increment(1);
        tracing::warn!(%client, path = %request.uri().path(), "rate limit exceeded");
        return ApiError::TooManyRequests.into_response();
    }
    next.run(request).await
}

/// Runs [`RateLimiter::compact`] once per window until the task is aborted.
pub fn spawn_compaction(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = limiter.window().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let forgotten = limiter.compact();
            if forgotten > 0 {
                tracing::debug!(forgotten, "rate limiter compacted");
            }
        }
    })
}
