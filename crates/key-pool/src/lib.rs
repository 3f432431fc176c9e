//! API key pool for the generative-AI provider
//!
//! Holds a fixed set of API keys loaded at startup, picks the next key with a
//! cooldown-aware rotation, and drives the retry loop that sweeps the keys
//! and waits between sweeps.
//!
//! Key lifecycle within one review:
//! 1. Selector scans from the rotation cursor for a key that is not cooling
//!    down (used in the last 30s) and has fewer than 3 recent errors
//! 2. No such key → least recently used key, constraints ignored
//! 3. Attempt marks the key used; failure records an error event,
//!    rate limiting also moves the cursor past it
//! 4. Success clears the key's error record
//! 5. A full sweep without success → every key reset, escalating sleep,
//!    next sweep
//! 6. Error events age out after 2 minutes without any background task

pub mod error;
pub mod pool;
pub mod retry;
pub mod selection;

pub use error::{Error, Result};
pub use pool::{ApiKey, KeyState, Pool, load_keys};
pub use retry::{AttemptOutcome, RetryPolicy, Rotated, run};
pub use selection::{Rule, Selection, SelectionPolicy, select_index};
