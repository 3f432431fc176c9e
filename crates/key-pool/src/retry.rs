//! Rotation and wait-cycle retry controller
//!
//! One review runs one sequential loop:
//!
//! - sweep: up to one attempt per key, keys chosen by the selector, each key
//!   tried at most once per sweep
//! - between sweeps: every key is reset and the loop sleeps
//!   `wait_base + cycle * wait_step` (45s, 65s, 85s by default)
//! - `max_wait_cycles + 1` sweeps in total, then exhaustion
//!
//! The attempt itself is injected, so the loop knows nothing about HTTP or
//! response parsing.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::pool::{ApiKey, Pool};

/// Result of one attempt with one key.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Quota or rate window exhausted; the cursor moves past this key.
    RateLimited(String),
    OtherFailure(String),
}

impl<T> AttemptOutcome<T> {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::RateLimited(_) => "rate_limited",
            AttemptOutcome::OtherFailure(_) => "other_failure",
        }
    }
}

/// Wait-cycle budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Sleeps between sweeps; the loop runs this many plus one sweeps.
    pub max_wait_cycles: u32,
    pub wait_base: Duration,
    pub wait_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_wait_cycles: 3,
            wait_base: Duration::from_secs(45),
            wait_step: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the sweep numbered `cycle` (zero-based). Saturates at
    /// `Duration::MAX`.
    pub fn wait_for_cycle(&self, cycle: u32) -> Duration {
        self.wait_base.saturating_add(self.wait_step.saturating_mul(cycle))
    }
}

/// Successful value plus where it came from.
#[derive(Debug)]
pub struct Rotated<T> {
    pub value: T,
    /// Masked key that produced the value.
    pub key: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Zero-based sweep the success happened in.
    pub wait_cycle: u32,
}

/// Run `attempt` against the pool until it succeeds or the budget is spent.
///
/// Fails fast with `NoCredentials` on an empty pool without calling
/// `attempt`. On exhaustion the error carries the last failure message.
pub async fn run<T, F, Fut>(pool: &Pool, policy: &RetryPolicy, mut attempt: F) -> Result<Rotated<T>>
where
    F: FnMut(ApiKey) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    if pool.is_empty() {
        return Err(Error::NoCredentials);
    }

    let key_count = pool.len();
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;

    for wait_cycle in 0..=policy.max_wait_cycles {
        if wait_cycle > 0 {
            info!(
                wait_cycle,
                max_wait_cycles = policy.max_wait_cycles,
                "retrying all API keys after wait"
            );
        }

        let mut tried = HashSet::with_capacity(key_count);
        for slot in 0..key_count {
            let now = Instant::now();
            let Some(selection) = pool.select(now).await else {
                break;
            };
            if !tried.insert(selection.index) {
                continue;
            }
            let Some(key) = pool.key(selection.index).cloned() else {
                continue;
            };

            pool.mark_used(selection.index, now).await;
            attempts += 1;
            info!(
                key = %key,
                attempt = slot + 1,
                of = key_count,
                wait_cycle,
                rule = ?selection.rule,
                "attempting provider call"
            );

            let outcome = attempt(key.clone()).await;
            metrics::counter!("provider_attempts_total", "outcome" => outcome.label())
                .increment(1);

            match outcome {
                AttemptOutcome::Success(value) => {
                    pool.reset_errors(selection.index).await;
                    info!(key = %key, attempts, wait_cycle, "provider call succeeded");
                    return Ok(Rotated {
                        value,
                        key: key.masked(),
                        attempts,
                        wait_cycle,
                    });
                }
                AttemptOutcome::RateLimited(message) => {
                    let errors = pool.mark_error(selection.index, Instant::now()).await;
                    let cursor = pool.advance_cursor();
                    warn!(key = %key, errors, cursor, error = %message, "API key rate limited, rotating");
                    last_error = Some(message);
                }
                AttemptOutcome::OtherFailure(message) => {
                    let errors = pool.mark_error(selection.index, Instant::now()).await;
                    warn!(key = %key, errors, error = %message, "provider call failed");
                    last_error = Some(message);
                }
            }
        }

        if wait_cycle < policy.max_wait_cycles {
            let wait = policy.wait_for_cycle(wait_cycle);
            pool.reset_all().await;
            metrics::counter!("provider_wait_cycles_total").increment(1);
            warn!(
                wait_secs = wait.as_secs(),
                wait_cycle = wait_cycle + 1,
                "all API keys failed, waiting before next sweep"
            );
            tokio::time::sleep(wait).await;
        }
    }

    let last_error = last_error.unwrap_or_else(|| "no attempt completed".to_string());
    error!(keys = key_count, attempts, error = %last_error, "all API keys exhausted after all wait cycles");
    Err(Error::Exhausted {
        keys: key_count,
        attempts,
        last_error,
    })
}
