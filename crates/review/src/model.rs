//! Review request and result types
//!
//! Result fields are lenient on input: missing or `null` fields take their
//! defaults and the score accepts numbers or numeric strings, because the
//! model does not always follow the schema it was given. List items sent as
//! bare strings become the item's description, a single string or object
//! stands for a one-element list, and items that fit neither are dropped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, ReviewError};

/// Score used when the model gives none, and for degraded reviews.
pub const DEFAULT_SCORE: u8 = 7;

const MIN_SCORE: u8 = 1;
const MAX_SCORE: u8 = 10;

/// Inbound review request. Both fields are required; `code` must be
/// non-empty and `language` non-blank.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl ReviewRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            language: Some(language.into()),
        }
    }

    /// Returns `(code, trimmed language)` when both are present.
    pub fn validate(&self) -> Result<(&str, &str)> {
        let code = self.code.as_deref().filter(|c| !c.is_empty());
        let language = self.language.as_deref().map(str::trim).filter(|l| !l.is_empty());
        match (code, language) {
            (Some(code), Some(language)) => Ok((code, language)),
            _ => Err(ReviewError::Validation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub score: u8,
    #[serde(default, deserialize_with = "lenient_list")]
    pub bugs: Vec<Bug>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub optimizations: Vec<Optimization>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub security: Vec<SecurityIssue>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub improved_code: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub positives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bug {
    /// Line number, or "N/A" when the model can't pin one down.
    #[serde(default)]
    pub line: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub severity: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIssue {
    #[serde(default, deserialize_with = "lenient_string")]
    pub severity: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vulnerability: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fix: String,
}

fn default_score() -> u8 {
    DEFAULT_SCORE
}

/// List items the model sometimes sends as a bare string.
trait FromText {
    fn from_text(text: String) -> Self;
}

impl FromText for String {
    fn from_text(text: String) -> Self {
        text
    }
}

impl FromText for Bug {
    fn from_text(text: String) -> Self {
        Self {
            line: Value::Null,
            severity: String::new(),
            description: text,
            fix: String::new(),
        }
    }
}

impl FromText for Optimization {
    fn from_text(text: String) -> Self {
        Self {
            kind: String::new(),
            description: text,
            suggestion: String::new(),
        }
    }
}

impl FromText for SecurityIssue {
    fn from_text(text: String) -> Self {
        Self {
            severity: String::new(),
            vulnerability: String::new(),
            description: text,
            fix: String::new(),
        }
    }
}

/// Strings pass through, numbers and booleans are rendered, anything else
/// is empty.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => text,
        Some(value @ (Value::Number(_) | Value::Bool(_))) => value.to_string(),
        _ => String::new(),
    })
}

fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromText + DeserializeOwned,
{
    let items = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items,
        Some(item @ (Value::String(_) | Value::Object(_))) => vec![item],
        _ => Vec::new(),
    };
    Ok(items.into_iter().filter_map(lenient_item).collect())
}

fn lenient_item<T: FromText + DeserializeOwned>(value: Value) -> Option<T> {
    match value {
        Value::String(text) => Some(T::from_text(text)),
        other => serde_json::from_value(other).ok(),
    }
}

/// Accept `8`, `7.6` and `"8"`; clamp to 1..=10. Anything else is the default.
fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(match raw {
        Some(score) if score.is_finite() => {
            score.round().clamp(f64::from(MIN_SCORE), f64::from(MAX_SCORE)) as u8
        }
        _ => DEFAULT_SCORE,
    })
}
