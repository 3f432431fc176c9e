//! Model output to `ReviewResult`
//!
//! Three tiers, tried in order:
//!
//! 1. Strict: strip code fences, parse the remainder as a JSON object. Any
//!    object is accepted; fields off the schema are coerced or defaulted
//! 2. Extracted: parse the span from the first `{` to the last `}`
//! 3. Degraded: wrap the raw text in a summary-only review
//!
//! The last tier always succeeds, so a successful provider call is never
//! turned into a failure by bad formatting.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::model::{DEFAULT_SCORE, ReviewResult};

/// Degraded summaries keep at most this many characters of the raw text.
const DEGRADED_SUMMARY_CHARS: usize = 500;

const DEGRADED_POSITIVE: &str = "Code submitted for review";

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?\n?").expect("valid fence regex"));

static CODE_FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```\w*\n?").expect("valid fence regex"));

static CODE_FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)```$").expect("valid fence regex"));

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid review JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no JSON object in model output")]
    NoObject,

    #[error("review JSON is not an object")]
    NotObject,
}

/// Which parse tier produced the review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Strict,
    Extracted,
    Degraded,
}

impl ParseTier {
    pub fn label(self) -> &'static str {
        match self {
            ParseTier::Strict => "strict",
            ParseTier::Extracted => "extracted",
            ParseTier::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReview {
    pub review: ReviewResult,
    pub tier: ParseTier,
}

/// Remove ```` ```json ```` and ```` ``` ```` markers (with one trailing
/// newline each) and trim.
pub fn strip_fences(raw: &str) -> String {
    JSON_FENCE.replace_all(raw, "").trim().to_string()
}

pub fn parse_strict(text: &str) -> Result<ReviewResult, ParseError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ParseError::NotObject);
    }
    Ok(serde_json::from_value(value)?)
}

/// Greedy span from the first `{` to the last `}`.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_extracted(text: &str) -> Result<ReviewResult, ParseError> {
    let object = extract_object(text).ok_or(ParseError::NoObject)?;
    parse_strict(object)
}

/// Summary-only review built from unparseable model output.
pub fn degraded(text: &str, source_code: &str) -> ReviewResult {
    ReviewResult {
        summary: text.chars().take(DEGRADED_SUMMARY_CHARS).collect(),
        score: DEFAULT_SCORE,
        bugs: Vec::new(),
        optimizations: Vec::new(),
        security: Vec::new(),
        improved_code: source_code.to_string(),
        positives: vec![DEGRADED_POSITIVE.to_string()],
    }
}

/// Drop stray fence lines the model sometimes leaves inside `improvedCode`.
pub fn sanitize_improved_code(code: &str) -> String {
    let opened = CODE_FENCE_OPEN.replace_all(code, "");
    CODE_FENCE_CLOSE.replace_all(&opened, "").trim().to_string()
}

/// Run the tier chain over raw model output. Never fails.
pub fn parse_review(raw: &str, source_code: &str) -> ParsedReview {
    let text = strip_fences(raw);

    let (mut review, tier) = match parse_strict(&text) {
        Ok(review) => (review, ParseTier::Strict),
        Err(strict_err) => {
            debug!(error = %strict_err, "strict parse failed, extracting object");
            match parse_extracted(&text) {
                Ok(review) => (review, ParseTier::Extracted),
                Err(err) => {
                    warn!(error = %err, "model output is not JSON, returning degraded review");
                    (degraded(&text, source_code), ParseTier::Degraded)
                }
            }
        }
    };

    if tier != ParseTier::Degraded && !review.improved_code.is_empty() {
        review.improved_code = sanitize_improved_code(&review.improved_code);
    }

    metrics::counter!("review_parse_total", "tier" => tier.label()).increment(1);
    ParsedReview { review, tier }
}
