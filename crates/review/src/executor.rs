//! One review attempt with one key

use std::sync::Arc;

use key_pool::{ApiKey, AttemptOutcome};
use provider::{ErrorClassification, Provider};
use tracing::debug;

use crate::parse::{ParsedReview, parse_review};

/// Sends a prompt through the provider and parses the answer. Failures are
/// classified into the outcome the rotation loop acts on.
#[derive(Clone)]
pub struct ReviewExecutor {
    provider: Arc<dyn Provider>,
}

impl ReviewExecutor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub async fn execute(
        &self,
        key: &ApiKey,
        prompt: &str,
        source_code: &str,
    ) -> AttemptOutcome<ParsedReview> {
        match self.provider.generate(key.expose(), prompt).await {
            Ok(text) => {
                debug!(provider = self.provider.id(), chars = text.len(), "provider returned text");
                AttemptOutcome::Success(parse_review(&text, source_code))
            }
            Err(err) => match self.provider.classify_error(&err) {
                ErrorClassification::RateLimited => AttemptOutcome::RateLimited(err.to_string()),
                ErrorClassification::Other => AttemptOutcome::OtherFailure(err.to_string()),
            },
        }
    }
}
