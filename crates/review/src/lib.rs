//! Code review over the rotating key pool
//!
//! Builds the reviewer prompt, sends it through the key-rotation loop, and
//! turns whatever text the model returns into a `ReviewResult`. Parsing never
//! fails: output that is not JSON degrades to a summary-only review.

pub mod error;
pub mod executor;
pub mod model;
pub mod parse;
pub mod prompt;
pub mod reviewer;

pub use error::{ReviewError, Result};
pub use executor::ReviewExecutor;
pub use model::{Bug, Optimization, ReviewRequest, ReviewResult, SecurityIssue};
pub use parse::{ParseError, ParseTier, ParsedReview, parse_review};
pub use prompt::build_prompt;
pub use reviewer::{Review, Reviewer};
