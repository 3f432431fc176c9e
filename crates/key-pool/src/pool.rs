//! Key pool and per-key state
//!
//! The key list is fixed at startup. Per-key state (last use, recent error
//! events) sits behind one `RwLock` held only for field updates; the rotation
//! cursor is an `AtomicUsize`. Select and mark are separate calls, so two
//! concurrent reviews can pick the same key. That costs at most one extra
//! provider call and is accepted.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Secret;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::selection::{Rule, Selection, SelectionPolicy, select_index};

/// One provider API key. Redacted in Debug/Display.
#[derive(Clone)]
pub struct ApiKey(Secret<String>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Secret::new(value.into()))
    }

    /// Raw key for the outbound call.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// `...` plus the last six characters, for logs and responses.
    pub fn masked(&self) -> String {
        self.0.masked()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.masked())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Parse a comma (or newline) separated key list.
///
/// Whitespace is trimmed and empty entries dropped, so an empty or
/// whitespace-only input yields no keys. Duplicates collapse onto the first
/// occurrence because key state is tracked per key value.
pub fn load_keys(raw: &str) -> Vec<ApiKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for entry in raw.split([',', '\n']) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if !seen.insert(entry) {
            warn!(key = %Secret::new(entry.to_string()).masked(), "duplicate API key ignored");
            continue;
        }
        keys.push(ApiKey::new(entry));
    }
    keys
}

/// Mutable bookkeeping for one key.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    last_used: Option<Instant>,
    errors: Vec<Instant>,
}

impl KeyState {
    /// Time of the most recent attempt, `None` if never used since the last reset.
    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    /// Number of error events within `window` of `now`.
    pub fn error_count(&self, now: Instant, window: Duration) -> usize {
        self.errors
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < window)
            .count()
    }

    /// Whether the key was used within `cooldown` of `now`.
    pub fn is_cooling(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_used
            .is_some_and(|at| now.saturating_duration_since(at) <= cooldown)
    }

    /// Primary selection rule.
    pub fn is_eligible(&self, now: Instant, policy: &SelectionPolicy) -> bool {
        self.error_count(now, policy.error_window) < policy.max_error_count
            && !self.is_cooling(now, policy.cooldown)
    }

    /// Record an attempt. Never moves `last_used` backwards.
    pub fn mark_used(&mut self, now: Instant) {
        self.last_used = Some(self.last_used.map_or(now, |at| at.max(now)));
    }

    /// Record a failure and drop events that have aged out.
    pub fn record_error(&mut self, now: Instant, window: Duration) {
        self.errors
            .retain(|at| now.saturating_duration_since(*at) < window);
        self.errors.push(now);
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Forget both usage and errors.
    pub fn reset(&mut self) {
        self.last_used = None;
        self.errors.clear();
    }
}

/// Process-wide key pool, shared via `Arc` between concurrent reviews.
pub struct Pool {
    keys: Vec<ApiKey>,
    states: RwLock<Vec<KeyState>>,
    cursor: AtomicUsize,
    policy: SelectionPolicy,
}

impl Pool {
    pub fn new(keys: Vec<ApiKey>, policy: SelectionPolicy) -> Self {
        let states = vec![KeyState::default(); keys.len()];
        info!(keys = keys.len(), "key pool initialized");
        Self {
            keys,
            states: RwLock::new(states),
            cursor: AtomicUsize::new(0),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, index: usize) -> Option<&ApiKey> {
        self.keys.get(index)
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Current rotation cursor.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Snapshot of one key's state.
    pub async fn state(&self, index: usize) -> Option<KeyState> {
        self.states.read().await.get(index).cloned()
    }

    /// Pick the next key. A primary pick moves the cursor onto it; a fallback
    /// pick leaves the cursor alone.
    pub async fn select(&self, now: Instant) -> Option<Selection> {
        let states = self.states.read().await;
        let selection = select_index(&states, self.cursor(), now, &self.policy)?;
        match selection.rule {
            Rule::Primary => self.cursor.store(selection.index, Ordering::Relaxed),
            Rule::Fallback => {
                debug!(index = selection.index, "no key ready, using least recently used");
            }
        }
        Some(selection)
    }

    pub async fn mark_used(&self, index: usize, now: Instant) {
        if let Some(state) = self.states.write().await.get_mut(index) {
            state.mark_used(now);
        }
    }

    /// Record a failure; returns the key's error count afterwards.
    pub async fn mark_error(&self, index: usize, now: Instant) -> usize {
        let mut states = self.states.write().await;
        match states.get_mut(index) {
            Some(state) => {
                state.record_error(now, self.policy.error_window);
                state.error_count(now, self.policy.error_window)
            }
            None => 0,
        }
    }

    pub async fn reset_errors(&self, index: usize) {
        if let Some(state) = self.states.write().await.get_mut(index) {
            state.clear_errors();
        }
    }

    /// Move the cursor one past its current position; returns the new value.
    pub fn advance_cursor(&self) -> usize {
        let n = self.keys.len();
        if n == 0 {
            return 0;
        }
        let next = (self.cursor() + 1) % n;
        self.cursor.store(next, Ordering::Relaxed);
        next
    }

    /// Clear usage and errors on every key.
    pub async fn reset_all(&self) {
        let mut states = self.states.write().await;
        for state in states.iter_mut() {
            state.reset();
        }
        info!(keys = states.len(), "all API keys reset");
    }

    /// Pool summary for the health endpoint.
    ///
    /// A key is `ready` when the primary rule would accept it, `erroring` when
    /// it has too many recent errors, `cooling_down` otherwise. Pool status:
    /// any key ready → healthy, keys but none ready → degraded, no keys →
    /// unconfigured.
    pub async fn health(&self, now: Instant) -> serde_json::Value {
        let states = self.states.read().await;
        let mut keys = Vec::with_capacity(self.keys.len());
        let mut ready = 0usize;
        let mut cooling = 0usize;
        let mut erroring = 0usize;

        for (key, state) in self.keys.iter().zip(states.iter()) {
            let errors = state.error_count(now, self.policy.error_window);
            let status = if errors >= self.policy.max_error_count {
                erroring += 1;
                "erroring"
            } else if state.is_cooling(now, self.policy.cooldown) {
                cooling += 1;
                "cooling_down"
            } else {
                ready += 1;
                "ready"
            };
            keys.push(serde_json::json!({
                "key": key.masked(),
                "status": status,
                "recent_errors": errors,
                "last_used_secs_ago": state
                    .last_used()
                    .map(|at| now.saturating_duration_since(at).as_secs()),
            }));
        }

        let status = if self.keys.is_empty() {
            "unconfigured"
        } else if ready > 0 {
            "healthy"
        } else {
            "degraded"
        };

        serde_json::json!({
            "status": status,
            "keys_total": self.keys.len(),
            "keys_ready": ready,
            "keys_cooling_down": cooling,
            "keys_erroring": erroring,
            "keys": keys,
        })
    }
}
