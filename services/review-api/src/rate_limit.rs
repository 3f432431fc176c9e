//! Fixed-window inbound rate limit for review traffic
//!
//! One counter for the whole process, reset every window. This keeps a
//! single client from draining the key pool; it is not per-client fairness.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::warn;

use crate::error::ApiError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    current: Mutex<Window>,
}

impl RateLimiter {
    /// `limit` requests per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: WINDOW,
            current: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Count one request; false when the window is already full.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if now.saturating_duration_since(current.started) >= self.window {
            current.started = now;
            current.count = 0;
        }
        if current.count >= self.limit {
            return false;
        }
        current.count += 1;
        true
    }
}

/// axum middleware rejecting requests over the limit with 429.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire(Instant::now()) {
        return next.run(request).await;
    }
    warn!(
        path = %request.uri().path(),
        limit = limiter.limit,
        "inbound rate limit exceeded"
    );
    ApiError::TooManyRequests.into_response()
}
