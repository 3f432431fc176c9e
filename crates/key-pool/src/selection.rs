//! Cooldown-aware key selection
//!
//! Pure function over a snapshot of key states; the pool owns the cursor
//! update. Two rules, tried in order:
//!
//! 1. Primary: first key from the cursor (wrapping) that has fewer than
//!    `max_error_count` recent errors and was last used more than `cooldown` ago
//! 2. Fallback: the least recently used key, ignoring both constraints, so a
//!    fully hot pool still makes progress

use std::time::Duration;

use tokio::time::Instant;

use crate::pool::KeyState;

/// Thresholds for the primary selection rule.
#[derive(Debug, Clone, Copy)]
pub struct SelectionPolicy {
    /// A key used within this window is skipped by the primary rule.
    pub cooldown: Duration,
    /// Keys with this many recent errors are skipped by the primary rule.
    pub max_error_count: usize,
    /// How long an error event counts towards a key's error count.
    pub error_window: Duration,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            max_error_count: 3,
            error_window: Duration::from_secs(120),
        }
    }
}

/// Which rule picked the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub rule: Rule,
}

/// Pick the next key. Returns `None` only for an empty pool.
pub fn select_index(
    states: &[KeyState],
    cursor: usize,
    now: Instant,
    policy: &SelectionPolicy,
) -> Option<Selection> {
    let n = states.len();
    if n == 0 {
        return None;
    }

    let start = cursor % n;
    for offset in 0..n {
        let index = (start + offset) % n;
        if states[index].is_eligible(now, policy) {
            return Some(Selection {
                index,
                rule: Rule::Primary,
            });
        }
    }

    // `None < Some(_)`, and min_by_key keeps the first of equal minima,
    // which gives pool order on ties.
    states
        .iter()
        .enumerate()
        .min_by_key(|(_, state)| state.last_used())
        .map(|(index, _)| Selection {
            index,
            rule: Rule::Fallback,
        })
}
