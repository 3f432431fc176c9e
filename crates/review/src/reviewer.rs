//! Review entry point: validate, prompt, rotate, parse

use std::sync::Arc;

use key_pool::{Pool, RetryPolicy};
use provider::Provider;
use tracing::info;

use crate::error::Result;
use crate::executor::ReviewExecutor;
use crate::model::{ReviewRequest, ReviewResult};
use crate::parse::ParseTier;
use crate::prompt::build_prompt;

/// A finished review and the key that produced it.
#[derive(Debug, Clone)]
pub struct Review {
    pub review: ReviewResult,
    pub tier: ParseTier,
    /// Masked form of the key that succeeded.
    pub key: String,
    pub attempts: u32,
    pub wait_cycle: u32,
}

pub struct Reviewer {
    pool: Arc<Pool>,
    executor: ReviewExecutor,
    retry: RetryPolicy,
}

impl Reviewer {
    pub fn new(pool: Arc<Pool>, provider: Arc<dyn Provider>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            executor: ReviewExecutor::new(provider),
            retry,
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn provider(&self) -> &dyn Provider {
        self.executor.provider()
    }

    /// Review one submission.
    ///
    /// Validation happens before any key is touched. Provider failures are
    /// absorbed by the rotation loop; only exhaustion reaches the caller.
    pub async fn review(&self, request: &ReviewRequest) -> Result<Review> {
        let (code, language) = request.validate()?;
        let prompt = build_prompt(language, code);
        info!(language, code_chars = code.len(), keys = self.pool.len(), "starting review");

        let executor = &self.executor;
        let prompt = prompt.as_str();
        let rotated = key_pool::run(&self.pool, &self.retry, |key| async move {
            executor.execute(&key, prompt, code).await
        })
        .await?;

        Ok(Review {
            review: rotated.value.review,
            tier: rotated.value.tier,
            key: rotated.key,
            attempts: rotated.attempts,
            wait_cycle: rotated.wait_cycle,
        })
    }
}
